//! HTTP Server
//!
//! Single listener serving the WebSocket stream endpoint alongside health
//! checks and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /` - Service info
//! - `GET /api/ws/stream` - WebSocket control channel and tick stream
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the data source)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::MarketDataSource;
use crate::application::services::ConnectionRegistry;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::stream_handler;

/// Path of the WebSocket stream endpoint.
pub const STREAM_PATH: &str = "/api/ws/stream";

// =============================================================================
// Response Types
// =============================================================================

/// Service info returned from `/`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub message: &'static str,
    /// Service version.
    pub version: String,
    /// Path of the WebSocket stream.
    pub stream: &'static str,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "degraded".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live client connections.
    pub connections: usize,
    /// Symbols with at least one subscriber.
    pub active_symbols: usize,
    /// Total (connection, symbol) subscriptions.
    pub subscriptions: usize,
    /// Whether the market data source is connected.
    pub source_connected: bool,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Data source connected, ticks are flowing.
    Healthy,
    /// Serving connections, but the data source is offline.
    Degraded,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for HTTP and WebSocket handlers.
pub struct AppState {
    version: String,
    started_at: Instant,
    registry: Arc<ConnectionRegistry>,
    source: Arc<dyn MarketDataSource>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("version", &self.version)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<ConnectionRegistry>,
        source: Arc<dyn MarketDataSource>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            source,
            shutdown,
        }
    }

    /// Connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Process-wide shutdown token.
    #[must_use]
    pub const fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP and WebSocket server.
#[derive(Debug)]
pub struct HttpServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        Self { addr, state }
    }

    /// Bind and serve until the state's shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.addr, e.to_string()))?;

        serve(listener, self.state).await
    }
}

/// Build the router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route(STREAM_PATH, get(stream_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until shutdown.
///
/// # Errors
///
/// Returns `ServerError::ServerFailed` if the server stops with an error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();
    let addr = listener.local_addr().ok();
    let app = create_router(state);

    tracing::info!(addr = ?addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ServiceInfo {
        message: "Market Stream",
        version: state.version.clone(),
        stream: STREAM_PATH,
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_health_response(&state)))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.source.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let stats = state.registry.stats();
    let source_connected = state.source.is_connected();

    HealthResponse {
        status: determine_health_status(source_connected),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connections: stats.connections,
        active_symbols: stats.active_symbols,
        subscriptions: stats.subscriptions,
        source_connected,
    }
}

const fn determine_health_status(source_connected: bool) -> HealthStatus {
    if source_connected {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_follows_source() {
        assert_eq!(determine_health_status(true), HealthStatus::Healthy);
        assert_eq!(determine_health_status(false), HealthStatus::Degraded);
    }

    #[test]
    fn bind_error_display() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let err = ServerError::BindFailed(addr, "in use".to_string());
        assert_eq!(err.to_string(), "failed to bind to 127.0.0.1:8000: in use");
    }
}
