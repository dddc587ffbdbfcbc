//! Market Stream Binary
//!
//! Starts the tick fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_HOST`: Bind host (default: 0.0.0.0)
//! - `MARKET_STREAM_PORT`: HTTP/WebSocket port (default: 8000)
//! - `MARKET_STREAM_BROADCAST_INTERVAL_MS`: Broadcast period (default: 1000)
//! - `MARKET_STREAM_FETCH_TIMEOUT_MS`: Per-symbol fetch bound (default: 500)
//! - `MARKET_STREAM_MAX_CONNECTIONS`: Connection limit (default: 10000)
//! - `MARKET_STREAM_OUTBOUND_CAPACITY`: Per-connection queue (default: 256)
//! - `MARKET_STREAM_SIM_SYMBOLS`: Simulated symbols (default: EURUSD,GBPUSD,USDJPY,XAUUSD)
//! - `MARKET_STREAM_SIM_INTERVAL_MS`: Simulated feed step (default: 250)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream)
//! - `RUST_LOG`: Log filter (default: market_stream=info)

use std::sync::Arc;
use std::time::Duration;

use market_stream::infrastructure::telemetry;
use market_stream::{
    AppState, BroadcastLoop, ConnectionRegistry, HttpServer, MarketDataSource, QuoteCache,
    SimulatedFeed, StreamConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env()?;
    log_config(&config);
    let bind_addr = config.server.bind_addr()?;

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(ConnectionRegistry::new(config.registry.into()));
    let quotes = Arc::new(QuoteCache::new());
    let source: Arc<dyn MarketDataSource> = quotes.clone();

    // Spawn simulated feed
    let feed = SimulatedFeed::new(
        Arc::clone(&quotes),
        &config.simulation.symbols,
        config.simulation.step_interval,
    );
    tracing::debug!(
        symbols = ?feed.symbols(),
        step_ms = config.simulation.step_interval.as_millis(),
        "Simulated feed"
    );
    let feed_handle = tokio::spawn(feed.run(shutdown_token.clone()));

    // Spawn broadcast loop
    let broadcast_loop = BroadcastLoop::new(
        Arc::clone(&registry),
        Arc::clone(&source),
        config.broadcast.into(),
    );
    let loop_handle = tokio::spawn(broadcast_loop.run(shutdown_token.clone()));

    // Spawn HTTP + WebSocket server
    let state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        source,
        shutdown_token.clone(),
    ));
    let server = HttpServer::new(bind_addr, state);
    let server_shutdown = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        let result = server.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "HTTP server error");
            server_shutdown.cancel();
        }
        result
    });

    tracing::info!(addr = %bind_addr, "Market stream ready");

    await_shutdown(shutdown_token).await;

    let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let (server_result, _, _) = tokio::join!(server_handle, loop_handle, feed_handle);
        server_result
    })
    .await;

    registry.shutdown();

    match joined {
        Ok(Ok(Err(e))) => return Err(e.into()),
        Ok(Err(e)) => return Err(anyhow::anyhow!("HTTP server task failed: {e}")),
        Ok(Ok(Ok(()))) => {}
        Err(_) => {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Tasks did not stop in time"
            );
        }
    }

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        broadcast_interval_ms = config.broadcast.interval.as_millis(),
        fetch_timeout_ms = config.broadcast.fetch_timeout.as_millis(),
        max_connections = config.registry.max_connections,
        outbound_capacity = config.registry.outbound_capacity,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a task to cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested internally");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
