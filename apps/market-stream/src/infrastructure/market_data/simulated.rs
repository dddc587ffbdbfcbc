//! Simulated Market Data Feed
//!
//! Random-walk quote generator that stands in for a real terminal. Each
//! step nudges every symbol's mid price by a small random fraction and
//! writes a fresh bid/ask into the `QuoteCache`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::quote_cache::QuoteCache;
use crate::domain::streaming::{Quote, Symbol};

/// Largest per-step move, in millionths of the mid price.
const MAX_STEP_MICROS: i64 = 50;

/// Half-spread as a fraction of mid (0.001%).
const HALF_SPREAD: Decimal = Decimal::from_parts(1, 0, 0, false, 5);

/// Random-walk quote generator.
#[derive(Debug)]
pub struct SimulatedFeed {
    cache: Arc<QuoteCache>,
    step_interval: Duration,
    mids: HashMap<Symbol, Decimal>,
}

impl SimulatedFeed {
    /// Create a feed for `symbols` writing into `cache`.
    #[must_use]
    pub fn new(cache: Arc<QuoteCache>, symbols: &[Symbol], step_interval: Duration) -> Self {
        let mids = symbols
            .iter()
            .map(|symbol| (symbol.clone(), starting_mid(symbol)))
            .collect();
        Self {
            cache,
            step_interval,
            mids,
        }
    }

    /// Symbols this feed publishes.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.mids.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Advance every symbol one step and publish the new quotes.
    pub fn step(&mut self) {
        let now = Utc::now();
        let mut rng = rand::rng();

        for (symbol, mid) in &mut self.mids {
            let drift = Decimal::new(rng.random_range(-MAX_STEP_MICROS..=MAX_STEP_MICROS), 6);
            let next = (*mid * (Decimal::ONE + drift)).max(Decimal::new(1, 4));
            *mid = next;
            self.cache.update(symbol.clone(), quote_around(next, now));
        }
    }

    /// Publish quotes every `step_interval` until `cancel` fires.
    ///
    /// The cache is marked connected while the feed runs.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.step_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.cache.set_connected(true);
        tracing::info!(
            symbols = self.mids.len(),
            step_ms = self.step_interval.as_millis(),
            "Simulated feed started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.step(),
            }
        }

        self.cache.set_connected(false);
        tracing::info!(quotes = self.cache.len(), "Simulated feed stopped");
    }
}

fn starting_mid(symbol: &Symbol) -> Decimal {
    match symbol.as_str() {
        "EURUSD" => Decimal::new(11_000, 4),
        "GBPUSD" => Decimal::new(12_700, 4),
        "USDJPY" => Decimal::new(15_000, 2),
        "XAUUSD" => Decimal::new(2_000, 0),
        _ => Decimal::ONE_HUNDRED,
    }
}

fn quote_around(mid: Decimal, time: chrono::DateTime<Utc>) -> Quote {
    let half = (mid * HALF_SPREAD).max(Decimal::new(1, 5));
    let bid = (mid - half).round_dp(5);
    let ask = (mid + half).round_dp(5);
    Quote::new(bid, ask, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MarketDataSource;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn step_publishes_every_symbol() {
        let cache = Arc::new(QuoteCache::new());
        let mut feed = SimulatedFeed::new(
            Arc::clone(&cache),
            &[sym("EURUSD"), sym("XAUUSD")],
            Duration::from_millis(10),
        );

        feed.step();

        assert_eq!(cache.len(), 2);
        assert_eq!(feed.symbols(), vec![sym("EURUSD"), sym("XAUUSD")]);
    }

    #[test]
    fn quotes_keep_bid_below_ask() {
        let cache = Arc::new(QuoteCache::new());
        let mut feed = SimulatedFeed::new(
            Arc::clone(&cache),
            &[sym("EURUSD"), sym("USDJPY"), sym("ABC")],
            Duration::from_millis(10),
        );

        for _ in 0..200 {
            feed.step();
            for symbol in feed.symbols() {
                let quote = cache.get(&symbol).unwrap();
                assert!(quote.bid < quote.ask, "{symbol}: {quote:?}");
                assert!(quote.bid > Decimal::ZERO);
            }
        }
    }

    #[test]
    fn walk_stays_near_start() {
        let cache = Arc::new(QuoteCache::new());
        let mut feed = SimulatedFeed::new(
            Arc::clone(&cache),
            &[sym("EURUSD")],
            Duration::from_millis(10),
        );

        feed.step();

        let quote = cache.get(&sym("EURUSD")).unwrap();
        let mid = (quote.bid + quote.ask) / Decimal::TWO;
        assert!((mid - Decimal::new(11_000, 4)).abs() < Decimal::new(1, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn run_marks_cache_connected_until_cancelled() {
        let cache = Arc::new(QuoteCache::new());
        let feed = SimulatedFeed::new(
            Arc::clone(&cache),
            &[sym("EURUSD")],
            Duration::from_millis(100),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(feed.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.is_connected());
        assert!(cache.get(&sym("EURUSD")).is_some());

        cancel.cancel();
        handle.await.unwrap();
        assert!(!cache.is_connected());
    }
}
