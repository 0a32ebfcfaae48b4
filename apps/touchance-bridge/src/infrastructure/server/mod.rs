//! Fan-Out Server
//!
//! Multiplexes one gateway session across many WebSocket clients.
//!
//! ```text
//! client ──text──► CommandRouter ──► QuoteGateway ──► gateway (REQ/REP)
//!    ▲                  │
//!    └──── own queue ◄──┘
//!
//! gateway (PUB) ──► GatewayClient events (PING, REALTIME) ──► ConnectionHub ──► every client
//! ```

pub mod auth;
pub mod command;
pub mod connection;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use auth::{AccessToken, INVALID_TOKEN_BODY, TokenQuery, hash_token, normalize_token};
pub use command::{Command, CommandError, CommandRouter, SUCCESS_FAIL, parse_command};
pub use connection::{InboundHandler, serve_socket, ws_router};

use crate::application::ports::QuoteGateway;
use crate::infrastructure::broadcast::ConnectionHub;
use crate::infrastructure::gateway::GatewayClient;

/// Push events rebroadcast to every client by default.
pub const DEFAULT_BROADCAST_EVENTS: &[&str] = &["PING", "REALTIME"];

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Server error during operation.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The downstream side of the bridge.
pub struct FanOutServer {
    hub: Arc<ConnectionHub>,
    router: Arc<CommandRouter>,
    access: AccessToken,
}

impl FanOutServer {
    /// Create a server routing commands to `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<dyn QuoteGateway>, hub: Arc<ConnectionHub>, access: AccessToken) -> Self {
        Self {
            hub,
            router: Arc::new(CommandRouter::new(gateway)),
            access,
        }
    }

    /// Live connection set.
    #[must_use]
    pub const fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Rebroadcast the client's `events` pushes to every connection.
    pub fn attach<S: AsRef<str>>(&self, client: &GatewayClient, events: &[S]) {
        for event in events {
            let hub = Arc::clone(&self.hub);
            let event = event.as_ref();
            client.on(event, move |message| {
                hub.broadcast_json(&message);
            });
            tracing::debug!(event, "Broadcasting gateway event");
        }
    }

    /// HTTP router with the WebSocket endpoint.
    #[must_use]
    pub fn router(&self) -> Router {
        ws_router(
            Arc::clone(&self.hub),
            Arc::clone(&self.router),
            self.access.clone(),
        )
    }

    /// Bind `addr` and serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server fails.
    pub async fn run(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        serve_router(listener, self.router(), cancel, "Fan-out server").await
    }
}

/// Serve `router` on `listener` with graceful shutdown.
pub(crate) async fn serve_router(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    name: &'static str,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "{name} listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(ServerError::Serve)?;

    tracing::info!("{name} stopped");
    Ok(())
}
