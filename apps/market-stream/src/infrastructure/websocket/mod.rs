//! WebSocket Stream Endpoint
//!
//! Bridges axum WebSocket connections to the connection registry and
//! per-connection control sessions.

mod handler;

pub use handler::{serve_connection, stream_handler};
