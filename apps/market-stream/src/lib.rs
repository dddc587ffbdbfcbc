#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream - Tick Fan-out Service
//!
//! A WebSocket service that lets many clients subscribe to per-symbol
//! market data. One broadcast loop polls the upstream source for every
//! symbol that has subscribers and fans each sample out to exactly those
//! clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming types, no I/O
//!   - `streaming`: Symbols, quotes, ticks
//!   - `connection`: Connection identity and lifecycle
//!   - `protocol`: Control channel messages
//!   - `subscription`: Bidirectional symbol ↔ connection index
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `MarketDataSource`
//!   - `services`: Connection registry, broadcast loop, control sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `market_data`: Quote cache and simulated feed
//!   - `websocket`: Per-connection reader/writer tasks
//!   - `http`: Router, health and metrics endpoints
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────────────┐
//! MarketDataSource ◄─┤ BroadcastLoop  │  every interval, symbols with subscribers
//!                    └───────┬────────┘
//!                            │ broadcast(symbol, tick)
//!                    ┌───────▼────────┐
//! ControlSession ───►│ Connection     │──► outbound queue ──► writer ──► Client 1
//!   (subscribe /     │ Registry       │──► outbound queue ──► writer ──► Client 2
//!    unsubscribe)    └────────────────┘──► outbound queue ──► writer ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionId, ConnectionState};
pub use domain::protocol::{AckStatus, ControlRequest, ProtocolError, ServerMessage};
pub use domain::streaming::{Quote, Symbol, Tick};
pub use domain::subscription::SubscriptionIndex;

// Ports
pub use application::ports::{MarketDataError, MarketDataSource};

// Services
pub use application::services::{
    BroadcastLoop, BroadcastLoopConfig, BroadcastReport, ConnectionRegistry, ControlSession,
    DeliveryError, Registration, RegistryConfig, RegistryError, RegistryStats, TickReport,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, RegistrySettings, ServerSettings, SimulationSettings,
    StreamConfig,
};

// HTTP server
pub use infrastructure::http::{
    AppState, HttpServer, STREAM_PATH, ServerError, create_router, serve,
};

// Market data adapters
pub use infrastructure::market_data::{QuoteCache, SimulatedFeed};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
