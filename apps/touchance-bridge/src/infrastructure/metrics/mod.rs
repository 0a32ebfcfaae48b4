//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Requests**: gateway request counts, failures by kind and latency
//! - **Frames**: push frames received by `DataType`, malformed frames
//! - **Fan-out**: live clients, broadcast deliveries and drops, client commands
//! - **Relay**: upstream reconnect attempts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle, if metrics were initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Gateway requests
    describe_counter!("bridge_requests_total", "Gateway requests sent, by verb");
    describe_counter!(
        "bridge_request_errors_total",
        "Gateway requests that failed, by error kind"
    );
    describe_histogram!(
        "bridge_request_duration_seconds",
        "Round trip of one gateway request, by verb"
    );

    // Push frames
    describe_counter!(
        "bridge_frames_received_total",
        "Push frames received, by DataType"
    );
    describe_counter!(
        "bridge_frames_malformed_total",
        "Push frames that failed to decode"
    );

    // Fan-out
    describe_gauge!("bridge_clients_connected", "Live WebSocket clients");
    describe_counter!(
        "bridge_broadcast_messages_total",
        "Messages queued to clients by broadcast"
    );
    describe_counter!(
        "bridge_broadcast_dropped_total",
        "Broadcast messages dropped for full or closed client queues"
    );
    describe_counter!(
        "bridge_client_commands_total",
        "Client commands routed, by command"
    );

    // Relay
    describe_counter!(
        "bridge_upstream_reconnects_total",
        "Upstream reconnect attempts by the proxy relay"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed gateway request.
pub fn record_request(verb: &str, elapsed: Duration) {
    counter!("bridge_requests_total", "verb" => verb.to_string()).increment(1);
    histogram!("bridge_request_duration_seconds", "verb" => verb.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a failed gateway request.
pub fn record_request_error(kind: &str) {
    counter!("bridge_request_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record a decoded push frame.
pub fn record_frame(data_type: &str) {
    counter!("bridge_frames_received_total", "data_type" => data_type.to_string()).increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_malformed_frame() {
    counter!("bridge_frames_malformed_total").increment(1);
}

/// Update the live client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients_connected(count: usize) {
    gauge!("bridge_clients_connected").set(count as f64);
}

/// Record one broadcast.
pub fn record_broadcast(delivered: usize, dropped: usize) {
    counter!("bridge_broadcast_messages_total").increment(delivered as u64);
    if dropped > 0 {
        counter!("bridge_broadcast_dropped_total").increment(dropped as u64);
    }
}

/// Record a routed client command.
pub fn record_client_command(command: &str) {
    counter!("bridge_client_commands_total", "command" => command.to_string()).increment(1);
}

/// Record an upstream reconnect attempt.
pub fn record_upstream_reconnect() {
    counter!("bridge_upstream_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
