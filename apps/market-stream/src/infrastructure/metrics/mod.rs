//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: live client count, rejected admissions
//! - **Subscriptions**: symbols with at least one subscriber
//! - **Messages**: messages sent and dropped by type / reason
//! - **Data source**: per-symbol fetch failures by reason
//! - **Latency**: duration of each broadcast tick
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "market_stream_connections",
        "Number of live client connections"
    );
    describe_gauge!(
        "market_stream_active_symbols",
        "Number of symbols with at least one subscriber"
    );
    describe_counter!(
        "market_stream_connections_rejected_total",
        "Connections rejected because the registry was full"
    );
    describe_counter!(
        "market_stream_messages_sent_total",
        "Messages queued to clients by message type"
    );
    describe_counter!(
        "market_stream_messages_dropped_total",
        "Messages not delivered to a client by reason"
    );
    describe_counter!(
        "market_stream_fetch_failures_total",
        "Per-symbol market data fetches skipped by reason"
    );
    describe_counter!(
        "market_stream_protocol_errors_total",
        "Malformed or rejected inbound control messages"
    );
    describe_histogram!(
        "market_stream_broadcast_tick_seconds",
        "Time to fetch and fan out one broadcast tick"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a message did not reach a client.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Client's outbound queue was full.
    QueueFull,
    /// Client's transport had already closed.
    Disconnected,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Update the live connection count.
pub fn set_connections(count: usize) {
    gauge!("market_stream_connections").set(count as f64);
}

/// Update the active symbol count.
pub fn set_active_symbols(count: usize) {
    gauge!("market_stream_active_symbols").set(count as f64);
}

/// Record a connection rejected at admission.
pub fn record_connection_rejected() {
    counter!("market_stream_connections_rejected_total").increment(1);
}

/// Record messages queued to clients.
pub fn record_messages_sent(message_type: &'static str, count: u64) {
    counter!(
        "market_stream_messages_sent_total",
        "message_type" => message_type
    )
    .increment(count);
}

/// Record messages that were not delivered.
pub fn record_messages_dropped(reason: DropReason, count: u64) {
    counter!(
        "market_stream_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a skipped market data fetch.
pub fn record_fetch_failure(reason: &'static str) {
    counter!(
        "market_stream_fetch_failures_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a rejected inbound control message.
pub fn record_protocol_error() {
    counter!("market_stream_protocol_errors_total").increment(1);
}

/// Record how long one broadcast tick took.
pub fn record_tick_duration(duration: Duration) {
    histogram!("market_stream_broadcast_tick_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
