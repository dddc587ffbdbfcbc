//! Broadcast Loop
//!
//! Periodic task that polls the market data source for every symbol with
//! subscribers and fans the samples out through the registry.
//!
//! The set of symbols is read from the registry on every tick and never
//! cached. Fetches for a tick run concurrently, each bounded by
//! `fetch_timeout`; a symbol that fails, times out or has no data is skipped
//! for that tick only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;

use crate::application::ports::MarketDataSource;
use crate::application::services::registry::ConnectionRegistry;
use crate::domain::protocol::ServerMessage;
use crate::domain::streaming::{Symbol, Tick};
use crate::infrastructure::metrics;

/// Broadcast loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastLoopConfig {
    /// Period between ticks.
    pub interval: Duration,
    /// Upper bound on a single symbol fetch.
    pub fetch_timeout: Duration,
}

impl Default for BroadcastLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_millis(500),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Symbols that had subscribers and were polled.
    pub polled: usize,
    /// Symbols whose sample was broadcast.
    pub broadcast: usize,
    /// Symbols skipped (no data, error or timeout).
    pub skipped: usize,
    /// Messages queued across all recipients.
    pub delivered: usize,
    /// Whether the whole tick was skipped because the source was offline.
    pub source_offline: bool,
}

/// Periodic fan-out of market data to subscribers.
pub struct BroadcastLoop {
    registry: Arc<ConnectionRegistry>,
    source: Arc<dyn MarketDataSource>,
    config: BroadcastLoopConfig,
}

impl std::fmt::Debug for BroadcastLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BroadcastLoop {
    /// Create a broadcast loop.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        source: Arc<dyn MarketDataSource>,
        config: BroadcastLoopConfig,
    ) -> Self {
        Self {
            registry,
            source,
            config,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// The first tick happens one interval after start. Ticks that fall
    /// behind are skipped rather than bursted.
    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.config.interval;
        let mut ticker = interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            fetch_timeout_ms = self.config.fetch_timeout.as_millis(),
            "Broadcast loop started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.polled > 0 {
                        tracing::trace!(
                            polled = report.polled,
                            broadcast = report.broadcast,
                            skipped = report.skipped,
                            delivered = report.delivered,
                            "Broadcast tick"
                        );
                    }
                }
            }
        }

        tracing::info!("Broadcast loop stopped");
    }

    /// Run a single tick.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();

        if !self.source.is_connected() {
            tracing::debug!("Market data source offline, skipping tick");
            return TickReport {
                source_offline: true,
                ..TickReport::default()
            };
        }

        let symbols = self.registry.active_symbols();
        if symbols.is_empty() {
            return TickReport::default();
        }

        let fetches = symbols.into_iter().map(|symbol| self.fetch(symbol));
        let ticks = join_all(fetches).await;

        let mut report = TickReport {
            polled: ticks.len(),
            ..TickReport::default()
        };

        for tick in ticks {
            let Some(tick) = tick else {
                report.skipped += 1;
                continue;
            };
            let symbol = tick.symbol.clone();
            let delivery = self.registry.broadcast(&symbol, &ServerMessage::tick(tick));
            report.broadcast += 1;
            report.delivered += delivery.delivered;
            tracing::trace!(
                symbol = %symbol,
                recipients = delivery.recipients(),
                delivered = delivery.delivered,
                "Tick broadcast"
            );
        }

        metrics::record_tick_duration(started.elapsed());
        report
    }

    async fn fetch(&self, symbol: Symbol) -> Option<Tick> {
        match timeout(self.config.fetch_timeout, self.source.latest(&symbol)).await {
            Ok(Ok(Some(quote))) => Some(Tick::from_quote(symbol, quote)),
            Ok(Ok(None)) => {
                metrics::record_fetch_failure("no_data");
                tracing::trace!(symbol = %symbol, "No data for symbol");
                None
            }
            Ok(Err(e)) => {
                metrics::record_fetch_failure(e.reason());
                tracing::warn!(symbol = %symbol, error = %e, "Market data fetch failed");
                None
            }
            Err(_) => {
                metrics::record_fetch_failure("timeout");
                tracing::warn!(
                    symbol = %symbol,
                    timeout_ms = self.config.fetch_timeout.as_millis(),
                    "Market data fetch timed out"
                );
                None
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MarketDataError, MockMarketDataSource};
    use crate::application::services::registry::{Registration, RegistryConfig};
    use crate::domain::streaming::Quote;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sample_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn quote(bid: &str, ask: &str) -> Quote {
        Quote::new(dec(bid), dec(ask), sample_time())
    }

    fn broadcast_loop(
        registry: &Arc<ConnectionRegistry>,
        source: MockMarketDataSource,
    ) -> BroadcastLoop {
        BroadcastLoop::new(
            Arc::clone(registry),
            Arc::new(source),
            BroadcastLoopConfig::default(),
        )
    }

    fn subscribed(registry: &ConnectionRegistry, symbols: &[&str]) -> Registration {
        let conn = registry.register().unwrap();
        for s in symbols {
            registry.subscribe(conn.id, sym(s)).unwrap();
        }
        conn
    }

    fn drain(conn: &mut Registration) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = conn.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn tick_reaches_each_subscriber_once() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let mut a = subscribed(&registry, &["EURUSD"]);
        let mut b = subscribed(&registry, &["EURUSD", "GBPUSD"]);

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(true);
        source.expect_latest().returning(|symbol| match symbol.as_str() {
            "EURUSD" => Ok(Some(quote("1.1000", "1.1002"))),
            "GBPUSD" => Ok(Some(quote("1.2700", "1.2703"))),
            _ => Ok(None),
        });

        let report = broadcast_loop(&registry, source).tick().await;

        assert_eq!(report.polled, 2);
        assert_eq!(report.broadcast, 2);
        assert_eq!(report.delivered, 3);

        let expected = ServerMessage::Tick {
            symbol: sym("EURUSD"),
            bid: dec("1.1000"),
            ask: dec("1.1002"),
            time: sample_time(),
        };

        let a_messages = drain(&mut a);
        assert_eq!(a_messages, vec![expected.clone()]);

        let b_messages = drain(&mut b);
        assert_eq!(b_messages.len(), 2);
        assert_eq!(b_messages.iter().filter(|m| **m == expected).count(), 1);
        assert!(b_messages.iter().any(|m| matches!(
            m,
            ServerMessage::Tick { symbol, .. } if symbol.as_str() == "GBPUSD"
        )));
    }

    #[tokio::test]
    async fn failing_symbol_does_not_block_others() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut eur = subscribed(&registry, &["EURUSD"]);
        let mut gbp = subscribed(&registry, &["GBPUSD"]);

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(true);
        source.expect_latest().returning(|symbol| match symbol.as_str() {
            "EURUSD" => Err(MarketDataError::Upstream("terminal error".to_string())),
            _ => Ok(Some(quote("1.2700", "1.2703"))),
        });

        let report = broadcast_loop(&registry, source).tick().await;

        assert_eq!(report.polled, 2);
        assert_eq!(report.broadcast, 1);
        assert_eq!(report.skipped, 1);
        assert!(drain(&mut eur).is_empty());
        assert_eq!(drain(&mut gbp).len(), 1);
    }

    #[tokio::test]
    async fn missing_data_skips_symbol() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut conn = subscribed(&registry, &["XAUUSD"]);

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(true);
        source.expect_latest().returning(|_| Ok(None));

        let report = broadcast_loop(&registry, source).tick().await;

        assert_eq!(report.skipped, 1);
        assert!(drain(&mut conn).is_empty());
    }

    #[tokio::test]
    async fn offline_source_skips_whole_tick() {
        let registry = Arc::new(ConnectionRegistry::default());
        let _conn = subscribed(&registry, &["EURUSD"]);

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(false);
        source.expect_latest().never();

        let report = broadcast_loop(&registry, source).tick().await;

        assert!(report.source_offline);
        assert_eq!(report.polled, 0);
    }

    #[tokio::test]
    async fn no_subscribers_polls_nothing() {
        let registry = Arc::new(ConnectionRegistry::default());

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(true);
        source.expect_latest().never();

        let report = broadcast_loop(&registry, source).tick().await;

        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn unsubscribed_symbol_is_not_polled() {
        let registry = Arc::new(ConnectionRegistry::default());
        let conn = subscribed(&registry, &["EURUSD", "GBPUSD"]);
        registry.unsubscribe(conn.id, &sym("GBPUSD"));

        let mut source = MockMarketDataSource::new();
        source.expect_is_connected().return_const(true);
        source
            .expect_latest()
            .withf(|symbol| symbol.as_str() == "EURUSD")
            .times(1)
            .returning(|_| Ok(Some(quote("1.1000", "1.1002"))));

        let report = broadcast_loop(&registry, source).tick().await;

        assert_eq!(report.polled, 1);
    }

    /// Source whose lookups never complete.
    struct StalledSource;

    #[async_trait::async_trait]
    impl MarketDataSource for StalledSource {
        async fn latest(&self, _symbol: &Symbol) -> Result<Option<Quote>, MarketDataError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut conn = subscribed(&registry, &["EURUSD"]);
        let broadcast = BroadcastLoop::new(
            Arc::clone(&registry),
            Arc::new(StalledSource),
            BroadcastLoopConfig::default(),
        );

        let report = broadcast.tick().await;

        assert_eq!(report.polled, 1);
        assert_eq!(report.skipped, 1);
        assert!(drain(&mut conn).is_empty());
    }

    /// Source that counts lookups.
    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl MarketDataSource for CountingSource {
        async fn latest(&self, _symbol: &Symbol) -> Result<Option<Quote>, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(quote("1.1000", "1.1002")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_interval_until_cancelled() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut conn = subscribed(&registry, &["EURUSD"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let broadcast = BroadcastLoop::new(
            Arc::clone(&registry),
            Arc::new(CountingSource {
                calls: Arc::clone(&calls),
            }),
            BroadcastLoopConfig::default(),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broadcast.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(drain(&mut conn).len(), 3);
    }
}
