//! Proxy Relay
//!
//! Pass-through relay in front of a fan-out server. One upstream WebSocket
//! is shared by every downstream client.
//!
//! ```text
//! fan-out server ──text──► ProxyRelay ──► ConnectionHub ──► every proxy client
//!        ▲                                                        │
//!        └──────────── UpstreamForwarder (mpsc) ◄────── text ─────┘
//! ```
//!
//! The upstream link is retried forever with a fixed delay. Client messages
//! arriving while upstream is down are dropped.

pub mod reconnect;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};

use crate::infrastructure::broadcast::ConnectionHub;
use crate::infrastructure::health::UpstreamStatus;
use crate::infrastructure::metrics;
use crate::infrastructure::server::{
    AccessToken, InboundHandler, ServerError, serve_router, ws_router,
};

/// Capacity of the client-to-upstream queue.
pub const DEFAULT_FORWARD_BUFFER: usize = 1024;

/// Relay settings.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Host of the fan-out server.
    pub upstream_host: String,
    /// Port of the fan-out server.
    pub upstream_port: u16,
    /// Token presented upstream.
    pub upstream_token: String,
    /// Upstream retry pacing.
    pub reconnect: ReconnectConfig,
    /// Capacity of the client-to-upstream queue.
    pub forward_buffer: usize,
}

impl ProxyConfig {
    /// Relay to `host:port`, retrying every second.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            upstream_host: host.into(),
            upstream_port: port,
            upstream_token: token.into(),
            reconnect: ReconnectConfig::default(),
            forward_buffer: DEFAULT_FORWARD_BUFFER,
        }
    }

    /// Upstream URL including the token.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        format!(
            "ws://{}:{}?token={}",
            self.upstream_host, self.upstream_port, self.upstream_token
        )
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("upstream_host", &self.upstream_host)
            .field("upstream_port", &self.upstream_port)
            .field("upstream_token", &"[REDACTED]")
            .field("reconnect", &self.reconnect)
            .field("forward_buffer", &self.forward_buffer)
            .finish()
    }
}

/// Hands client text to the upstream link.
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    tx: mpsc::Sender<String>,
    status: Arc<UpstreamStatus>,
}

impl UpstreamForwarder {
    /// Queue `text` for upstream. Returns whether it was accepted.
    pub fn forward(&self, text: String) -> bool {
        if !self.status.is_connected() {
            tracing::warn!("Upstream disconnected, dropping client message");
            return false;
        }

        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Upstream queue full, dropping client message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Upstream relay stopped, dropping client message");
                false
            }
        }
    }
}

#[async_trait]
impl InboundHandler for UpstreamForwarder {
    async fn on_text(&self, text: String, _out: &mpsc::Sender<String>) {
        self.forward(text);
    }
}

/// Upstream side of the relay.
pub struct ProxyRelay {
    config: ProxyConfig,
    hub: Arc<ConnectionHub>,
    status: Arc<UpstreamStatus>,
    forward_rx: mpsc::Receiver<String>,
}

impl ProxyRelay {
    /// Create the relay and the forwarder its clients write through.
    #[must_use]
    pub fn new(
        config: ProxyConfig,
        hub: Arc<ConnectionHub>,
        status: Arc<UpstreamStatus>,
    ) -> (Self, UpstreamForwarder) {
        let (tx, forward_rx) = mpsc::channel(config.forward_buffer.max(1));
        let forwarder = UpstreamForwarder {
            tx,
            status: Arc::clone(&status),
        };
        let relay = Self {
            config,
            hub,
            status,
            forward_rx,
        };
        (relay, forwarder)
    }

    /// Keep the upstream link alive until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] only when the
    /// reconnect config caps attempts.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ReconnectError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            match self.relay_once(&cancel, &mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    self.status.set_connected(false);
                    tracing::error!(error = %e, "Upstream link lost");
                }
            }

            let Some(delay) = policy.next_delay() else {
                return Err(ReconnectError::MaxAttemptsExceeded(policy.attempt_count()));
            };
            metrics::record_upstream_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting upstream"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_connected(false);
        tracing::info!("Proxy relay stopped");
        Ok(())
    }

    /// One upstream session. `Ok` means shutdown was requested.
    async fn relay_once(
        &mut self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ReconnectError> {
        let url = self.config.upstream_url();
        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            connected = connect_async(url.as_str()) => connected,
        };
        let (socket, _) = connected.map_err(|e| ReconnectError::ConnectionFailed(e.to_string()))?;

        policy.reset();
        self.status.set_connected(true);
        tracing::info!(
            host = %self.config.upstream_host,
            port = self.config.upstream_port,
            "Upstream connected"
        );

        let (mut sink, mut stream) = socket.split();
        let Self {
            hub,
            status,
            forward_rx,
            ..
        } = self;
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }

                Some(text) = forward_rx.recv() => {
                    sink.send(Message::Text(text.into()))
                        .await
                        .map_err(|e| ReconnectError::ConnectionFailed(e.to_string()))?;
                }

                received = stream.next() => match received {
                    Some(Ok(Message::Text(text))) => {
                        status.record_message();
                        hub.broadcast(text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(ReconnectError::ConnectionFailed(format!("closed by upstream: {reason}")));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ReconnectError::ConnectionFailed(e.to_string())),
                    None => return Err(ReconnectError::ConnectionFailed("upstream stream ended".to_string())),
                },
            }
        }
    }
}

/// Downstream router of the relay.
#[must_use]
pub fn proxy_router(
    hub: Arc<ConnectionHub>,
    forwarder: UpstreamForwarder,
    access: AccessToken,
) -> Router {
    ws_router(hub, Arc::new(forwarder), access)
}

/// Bind `addr` and serve relay clients until `cancel` fires.
///
/// # Errors
///
/// Returns an error if binding fails or the server fails.
pub async fn serve_proxy(
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve_router(listener, router, cancel, "Proxy relay").await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(connected: bool, buffer: usize) -> (UpstreamForwarder, mpsc::Receiver<String>) {
        let status = Arc::new(UpstreamStatus::default());
        status.set_connected(connected);
        let (tx, rx) = mpsc::channel(buffer);
        (UpstreamForwarder { tx, status }, rx)
    }

    #[test]
    fn upstream_url_carries_token() {
        let config = ProxyConfig::new("10.0.0.5", 8000, "abc");
        assert_eq!(config.upstream_url(), "ws://10.0.0.5:8000?token=abc");
    }

    #[test]
    fn debug_redacts_token() {
        let config = ProxyConfig::new("h", 1, "secret-token");
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn forwards_while_connected() {
        let (forwarder, mut rx) = forwarder(true, 4);
        assert!(forwarder.forward("hello".to_string()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn drops_while_disconnected() {
        let (forwarder, mut rx) = forwarder(false, 4);
        assert!(!forwarder.forward("hello".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drops_when_queue_full() {
        let (forwarder, _rx) = forwarder(true, 1);
        assert!(forwarder.forward("one".to_string()));
        assert!(!forwarder.forward("two".to_string()));
    }

    #[tokio::test]
    async fn capped_relay_gives_up_on_unreachable_upstream() {
        let hub = Arc::new(ConnectionHub::with_defaults());
        let status = Arc::new(UpstreamStatus::default());
        // Port 1 on loopback refuses connections.
        let mut config = ProxyConfig::new("127.0.0.1", 1, "t");
        config.reconnect =
            ReconnectConfig::fixed(std::time::Duration::from_millis(1)).with_max_attempts(2);
        let (relay, _forwarder) = ProxyRelay::new(config, hub, Arc::clone(&status));

        let result = relay.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(ReconnectError::MaxAttemptsExceeded(2))));
        assert!(!status.is_connected());
    }

    #[tokio::test]
    async fn cancelled_relay_stops_cleanly() {
        let hub = Arc::new(ConnectionHub::with_defaults());
        let status = Arc::new(UpstreamStatus::default());
        let (relay, _forwarder) =
            ProxyRelay::new(ProxyConfig::new("127.0.0.1", 1, "t"), hub, status);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(relay.run(cancel).await.is_ok());
    }
}
