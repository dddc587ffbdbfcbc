//! Connection Identity and Lifecycle
//!
//! A connection is identified by an opaque, process-unique id that is
//! independent of the transport object carrying it. Its control loop moves
//! through three states:
//!
//! ```text
//! Open ──(client close / transport error / send failure)──► Closing
//! Closing ──(registry cleanup complete)──────────────────► Closed
//! ```

use std::fmt;

use serde::Serialize;

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Receiving and dispatching control messages.
    #[default]
    Open,
    /// Transport teardown in progress.
    Closing,
    /// Terminal; registry cleanup has completed.
    Closed,
}

impl ConnectionState {
    /// Move `Open → Closing`.
    ///
    /// Returns `false` if the connection was already closing or closed.
    pub fn begin_close(&mut self) -> bool {
        if *self == Self::Open {
            *self = Self::Closing;
            true
        } else {
            false
        }
    }

    /// Move `Closing → Closed`.
    ///
    /// Returns `false` unless the connection was closing.
    pub fn finish_close(&mut self) -> bool {
        if *self == Self::Closing {
            *self = Self::Closed;
            true
        } else {
            false
        }
    }

    /// Check whether control messages are still accepted.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Get the state name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}
