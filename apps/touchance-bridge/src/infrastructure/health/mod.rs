//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (upstream connected)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! "Upstream" is the gateway session in `server` mode and the fan-out
//! server in `proxy` mode.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::ConnectionHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Upstream Status
// =============================================================================

/// Connection state of whatever this process relays from.
#[derive(Debug, Default)]
pub struct UpstreamStatus {
    connected: AtomicBool,
    messages_received: AtomicU64,
}

impl UpstreamStatus {
    /// Record a connect or disconnect.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Whether upstream is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Count one upstream message.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream messages seen so far.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Process mode (`server` or `proxy`).
    pub mode: &'static str,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream status.
    pub upstream: UpstreamInfo,
    /// Live clients.
    pub clients: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected.
    Healthy,
    /// Upstream down; clients are served but get no data.
    Unhealthy,
}

/// Upstream section of the health response.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Whether upstream is connected.
    pub connected: bool,
    /// Messages received from upstream.
    pub messages_received: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    mode: &'static str,
    started_at: Instant,
    upstream: Arc<UpstreamStatus>,
    hub: Arc<ConnectionHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        mode: &'static str,
        upstream: Arc<UpstreamStatus>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        Self {
            version,
            mode,
            started_at: Instant::now(),
            upstream,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = health_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Router with the health and metrics endpoints.
pub fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.upstream.is_connected() {
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

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let upstream = UpstreamInfo {
        connected: state.upstream.is_connected(),
        messages_received: state.upstream.messages_received(),
    };

    HealthResponse {
        status: determine_health_status(&upstream),
        version: state.version.clone(),
        mode: state.mode,
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        clients: state.hub.len(),
    }
}

const fn determine_health_status(upstream: &UpstreamInfo) -> HealthStatus {
    if upstream.connected {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn state(connected: bool) -> Arc<HealthServerState> {
        let upstream = Arc::new(UpstreamStatus::default());
        upstream.set_connected(connected);
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            "server",
            upstream,
            Arc::new(ConnectionHub::with_defaults()),
        ))
    }

    async fn get_status(state: Arc<HealthServerState>, path: &str) -> StatusCode {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        health_router(state).oneshot(request).await.unwrap().status()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn upstream_status_counts_messages() {
        let status = UpstreamStatus::default();
        assert!(!status.is_connected());
        status.record_message();
        status.record_message();
        status.set_connected(true);
        assert!(status.is_connected());
        assert_eq!(status.messages_received(), 2);
    }

    #[tokio::test]
    async fn readiness_follows_upstream() {
        assert_eq!(get_status(state(true), "/readyz").await, StatusCode::OK);
        assert_eq!(
            get_status(state(false), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        assert_eq!(get_status(state(false), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_clients() {
        let state = state(true);
        let hub = Arc::clone(&state.hub);
        let (_guard, _rx) = hub.register();

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.clients, 1);
        assert_eq!(get_status(state, "/health").await, StatusCode::OK);
    }
}
