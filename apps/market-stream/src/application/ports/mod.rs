//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following the
//! Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataSource`: latest-sample lookup against the upstream terminal

use async_trait::async_trait;

use crate::domain::streaming::{Quote, Symbol};

/// Upstream market data capability consumed by the broadcast loop.
///
/// Implementations must not block indefinitely; the broadcast loop bounds
/// every call with a timeout regardless, so a slow lookup only costs its
/// own symbol the current tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the most recent sample for a symbol.
    ///
    /// `Ok(None)` means the source has no data for the symbol right now.
    async fn latest(&self, symbol: &Symbol) -> Result<Option<Quote>, MarketDataError>;

    /// Whether the upstream connection is currently usable.
    ///
    /// The broadcast loop skips a whole tick while this is `false`.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Market data lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// Upstream terminal is not connected.
    #[error("market data source not connected")]
    NotConnected,

    /// Symbol is not known to the upstream source.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Upstream reported a failure.
    #[error("market data upstream error: {0}")]
    Upstream(String),
}

impl MarketDataError {
    /// Label used for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::UnknownSymbol(_) => "unknown_symbol",
            Self::Upstream(_) => "upstream",
        }
    }
}
