//! Market Data Streaming Types
//!
//! Core domain types for market data: symbols, quotes, and ticks.
//! These types are codec-agnostic and represent the canonical internal
//! representation of a sample flowing from the upstream source to clients.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, de};

// =============================================================================
// Symbol
// =============================================================================

/// An instrument identifier used as the subscription key.
///
/// Symbols are case-normalized on construction: surrounding whitespace is
/// trimmed and letters are upper-cased, so `" eurusd "` and `"EURUSD"` name
/// the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw identifier into a symbol.
    ///
    /// Returns `None` if the identifier is empty after trimming.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// Get the normalized symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| de::Error::custom("symbol must not be empty"))
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Latest top-of-book sample for one symbol, as reported by the upstream
/// market data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Time the source stamped the sample with.
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Create a new quote.
    #[must_use]
    pub const fn new(bid: Decimal, ask: Decimal, time: DateTime<Utc>) -> Self {
        Self { bid, ask, time }
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A single timestamped bid/ask sample for a symbol, ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Symbol the sample belongs to.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Sample time.
    pub time: DateTime<Utc>,
}

impl Tick {
    /// Attach a symbol to a quote.
    #[must_use]
    pub const fn from_quote(symbol: Symbol, quote: Quote) -> Self {
        Self {
            symbol,
            bid: quote.bid,
            ask: quote.ask,
            time: quote.time,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
