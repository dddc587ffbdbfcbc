//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// HTTP server: health, metrics and the stream route.
pub mod http;

/// Market data source adapters (quote cache, simulated feed).
pub mod market_data;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket connection handling.
pub mod websocket;
