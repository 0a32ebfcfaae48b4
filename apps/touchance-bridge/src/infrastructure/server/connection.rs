//! WebSocket connection handling shared by the fan-out server and the
//! proxy relay.
//!
//! Each accepted socket is split: a writer task drains the connection's
//! hub queue into the sink while the reader loop hands text frames to an
//! [`InboundHandler`] one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::auth::{AccessToken, TokenQuery, unauthorized};
use crate::infrastructure::broadcast::ConnectionHub;

/// Consumer of client text messages.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Handle one text message; replies for this client go to `out`.
    async fn on_text(&self, text: String, out: &mpsc::Sender<String>);
}

struct WsState<H: ?Sized> {
    hub: Arc<ConnectionHub>,
    handler: Arc<H>,
    access: AccessToken,
}

impl<H: ?Sized> Clone for WsState<H> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            handler: Arc::clone(&self.handler),
            access: self.access.clone(),
        }
    }
}

/// Router accepting token-authenticated WebSocket upgrades on any path.
pub fn ws_router<H: InboundHandler>(
    hub: Arc<ConnectionHub>,
    handler: Arc<H>,
    access: AccessToken,
) -> Router {
    let state = WsState {
        hub,
        handler,
        access,
    };

    Router::new()
        .route("/", get(upgrade::<H>))
        .route("/{*path}", get(upgrade::<H>))
        .with_state(state)
}

async fn upgrade<H: InboundHandler>(
    State(state): State<WsState<H>>,
    Query(query): Query<TokenQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.access.verify(query.token.as_deref()) {
        tracing::warn!("Rejected connection with invalid token");
        return unauthorized();
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| serve_socket(socket, state.hub, state.handler))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Run one connection until the client leaves.
///
/// Hub membership is held by a guard scoped to this function, so the
/// connection leaves the live set however the loop ends.
pub async fn serve_socket<H: InboundHandler + ?Sized>(
    socket: WebSocket,
    hub: Arc<ConnectionHub>,
    handler: Arc<H>,
) {
    let (guard, mut outbound) = hub.register();
    let client_id = guard.id();
    let replies = guard.sender();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => handler.on_text(text.as_str().to_owned(), &replies).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered by the protocol layer; binary is not part
            // of the client protocol.
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "Client socket error");
                break;
            }
        }
    }

    drop(guard);
    writer.abort();
}
