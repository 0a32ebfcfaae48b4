//! Connection Hub
//!
//! Live set of downstream connections and best-effort fan-out to them.
//!
//! # Architecture
//!
//! Each connection owns a bounded mpsc queue drained by its socket writer.
//! Broadcasts use `try_send`: a full or closed queue drops that message for
//! that connection only, so one slow client never stalls the others or the
//! gateway push loop.
//!
//! Membership is tied to a [`ConnectionGuard`]. Dropping the guard removes
//! the connection, so a handler that exits early through `?` or a panic
//! still leaves the set.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::infrastructure::metrics;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// `Reply` of the connection-count notification.
pub const CONNECTIONS_REPLY: &str = "CONNECTIONS";

/// Hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Per-connection queue capacity.
    pub client_buffer: usize,
    /// Broadcast the connection count whenever a client joins.
    pub announce_connections: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: 1024,
            announce_connections: true,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections whose queue was full or closed.
    pub dropped: usize,
}

#[derive(Debug)]
struct ConnectionEntry {
    tx: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
}

/// Live connection set.
#[derive(Debug)]
pub struct ConnectionHub {
    config: HubConfig,
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Hub configuration.
    #[must_use]
    pub const fn config(&self) -> HubConfig {
        self.config
    }

    /// Add a connection.
    ///
    /// Returns the membership guard and the receiving end of the
    /// connection's queue. When enabled, the new connection count is
    /// broadcast to everyone, including the newcomer.
    pub fn register(self: &Arc<Self>) -> (ConnectionGuard, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.config.client_buffer.max(1));
        let id = Uuid::new_v4();

        let count = {
            let mut connections = self.connections.write();
            connections.insert(
                id,
                ConnectionEntry {
                    tx: tx.clone(),
                    connected_at: Utc::now(),
                },
            );
            connections.len()
        };

        metrics::set_clients_connected(count);
        tracing::info!(client_id = %id, clients = count, "Client connected");

        if self.config.announce_connections {
            self.broadcast_json(&json!({"Reply": CONNECTIONS_REPLY, "count": count}));
        }

        let guard = ConnectionGuard {
            hub: Arc::clone(self),
            id,
            tx,
        };
        (guard, rx)
    }

    fn unregister(&self, id: ConnectionId) {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        if let Some(entry) = removed {
            let duration = Utc::now() - entry.connected_at;
            metrics::set_clients_connected(count);
            tracing::info!(
                client_id = %id,
                clients = count,
                connected_secs = duration.num_seconds(),
                "Client disconnected"
            );
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Queue `text` for every live connection without waiting.
    pub fn broadcast(&self, text: &str) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        {
            let connections = self.connections.read();
            for (id, entry) in connections.iter() {
                match entry.tx.try_send(text.to_string()) {
                    Ok(()) => stats.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        stats.dropped += 1;
                        tracing::warn!(client_id = %id, "Client queue full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stats.dropped += 1;
                        tracing::debug!(client_id = %id, "Client queue closed");
                    }
                }
            }
        }

        metrics::record_broadcast(stats.delivered, stats.dropped);
        stats
    }

    /// Serialize `value` and broadcast it.
    pub fn broadcast_json(&self, value: &Value) -> BroadcastStats {
        self.broadcast(&value.to_string())
    }
}

/// Membership of one connection; dropping it leaves the hub.
#[derive(Debug)]
pub struct ConnectionGuard {
    hub: Arc<ConnectionHub>,
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionGuard {
    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue for messages addressed to this connection only.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(client_buffer: usize, announce_connections: bool) -> Arc<ConnectionHub> {
        Arc::new(ConnectionHub::new(HubConfig {
            client_buffer,
            announce_connections,
        }))
    }

    #[test]
    fn guard_drop_removes_connection() {
        let hub = hub(8, false);
        let (first, _rx1) = hub.register();
        let (second, _rx2) = hub.register();
        assert_eq!(hub.len(), 2);

        let id = first.id();
        drop(first);
        assert_eq!(hub.len(), 1);
        assert!(!hub.contains(id));
        assert!(hub.contains(second.id()));

        drop(second);
        assert!(hub.is_empty());
    }

    #[test]
    fn guard_drop_on_panic_removes_connection() {
        let hub = hub(8, false);
        let cloned = Arc::clone(&hub);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let (_guard, _rx) = cloned.register();
            panic!("handler crashed");
        }));

        assert!(result.is_err());
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn announces_connection_count() {
        let hub = hub(8, true);
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        assert_eq!(rx_a.recv().await.unwrap(), r#"{"Reply":"CONNECTIONS","count":1}"#);
        assert_eq!(rx_a.recv().await.unwrap(), r#"{"Reply":"CONNECTIONS","count":2}"#);
        assert_eq!(rx_b.recv().await.unwrap(), r#"{"Reply":"CONNECTIONS","count":2}"#);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_others() {
        let hub = hub(1, false);
        let (_slow, _slow_rx) = hub.register();
        let (_fast, mut fast_rx) = hub.register();

        assert_eq!(hub.broadcast("one"), BroadcastStats { delivered: 2, dropped: 0 });
        assert_eq!(fast_rx.recv().await.unwrap(), "one");

        // The slow client never drained; only it loses the second message.
        assert_eq!(hub.broadcast("two"), BroadcastStats { delivered: 1, dropped: 1 });
        assert_eq!(fast_rx.recv().await.unwrap(), "two");
    }

    #[test]
    fn closed_receiver_counts_as_dropped() {
        let hub = hub(4, false);
        let (_guard, rx) = hub.register();
        drop(rx);

        assert_eq!(hub.broadcast("x"), BroadcastStats { delivered: 0, dropped: 1 });
    }

    #[test]
    fn broadcast_to_empty_hub() {
        let hub = hub(4, false);
        assert_eq!(hub.broadcast("x"), BroadcastStats::default());
    }
}
