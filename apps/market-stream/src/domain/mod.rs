//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for tick distribution with no
//! I/O. All types here are pure Rust with serialization support.

/// Connection identity and lifecycle state.
pub mod connection;

/// Control channel wire protocol (inbound requests, outbound messages).
pub mod protocol;

/// Market data streaming types (symbols, quotes, ticks).
pub mod streaming;

/// Per-symbol subscription index.
pub mod subscription;
