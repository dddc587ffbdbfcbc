//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionRegistry`: live connections, subscriptions and delivery
//! - `BroadcastLoop`: periodic fetch and fan-out of market data
//! - `ControlSession`: per-connection control message dispatch

mod broadcast_loop;
mod control;
mod registry;

pub use broadcast_loop::{BroadcastLoop, BroadcastLoopConfig, TickReport};
pub use control::ControlSession;
pub use registry::{
    BroadcastReport, ConnectionRegistry, DeliveryError, Registration, RegistryConfig,
    RegistryError, RegistryStats,
};
