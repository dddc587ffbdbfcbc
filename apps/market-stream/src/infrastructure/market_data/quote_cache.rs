//! Latest-Quote Cache
//!
//! In-memory `MarketDataSource` holding the most recent quote per symbol.
//! A feed task writes into it; the broadcast loop reads from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{MarketDataError, MarketDataSource};
use crate::domain::streaming::{Quote, Symbol};

/// Latest quote per symbol plus upstream connectivity.
#[derive(Debug, Default)]
pub struct QuoteCache {
    quotes: RwLock<HashMap<Symbol, Quote>>,
    connected: AtomicBool,
}

impl QuoteCache {
    /// Create an empty, disconnected cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest quote for a symbol, replacing any previous one.
    pub fn update(&self, symbol: Symbol, quote: Quote) {
        self.quotes.write().insert(symbol, quote);
    }

    /// Latest quote for a symbol, if any.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.read().get(symbol).copied()
    }

    /// Mark the upstream as connected or not.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::Release);
        if previous != connected {
            tracing::info!(connected, "Market data source connectivity changed");
        }
    }

    /// Number of symbols with a cached quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether no quotes are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

#[async_trait]
impl MarketDataSource for QuoteCache {
    async fn latest(&self, symbol: &Symbol) -> Result<Option<Quote>, MarketDataError> {
        if !self.is_connected() {
            return Err(MarketDataError::NotConnected);
        }
        Ok(self.get(symbol))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn quote(bid: i64, ask: i64) -> Quote {
        Quote::new(Decimal::new(bid, 4), Decimal::new(ask, 4), Utc::now())
    }

    #[tokio::test]
    async fn disconnected_cache_reports_not_connected() {
        let cache = QuoteCache::new();
        cache.update(sym("EURUSD"), quote(11_000, 11_002));

        assert!(!cache.is_connected());
        assert_eq!(
            cache.latest(&sym("EURUSD")).await,
            Err(MarketDataError::NotConnected)
        );
    }

    #[tokio::test]
    async fn returns_latest_quote() {
        let cache = QuoteCache::new();
        cache.set_connected(true);
        cache.update(sym("EURUSD"), quote(11_000, 11_002));
        cache.update(sym("EURUSD"), quote(11_001, 11_003));

        let latest = cache.latest(&sym("EURUSD")).await.unwrap().unwrap();
        assert_eq!(latest.bid, Decimal::new(11_001, 4));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_is_none() {
        let cache = QuoteCache::new();
        cache.set_connected(true);

        assert_eq!(cache.latest(&sym("XAUUSD")).await, Ok(None));
    }
}
