//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (market data source).
pub mod ports;

/// Application services: connection registry, broadcast loop, control sessions.
pub mod services;
