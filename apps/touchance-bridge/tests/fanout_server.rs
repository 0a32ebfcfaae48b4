//! Fan-Out Server Integration Tests
//!
//! Runs the real axum server on an ephemeral port and drives it with
//! WebSocket clients: token rejection, command routing, broadcast and the
//! live connection count.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, stream};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use touchance_bridge::{
    AccessToken, ConnectionHub, FanOutServer, GatewayError, HistoryRecord, HistoryStream,
    HistoryWindow, HubConfig, QuoteGateway, Verb, hash_token,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "letmein";

// =============================================================================
// Fake Quote Gateway
// =============================================================================

#[derive(Default)]
struct FakeQuotes {
    subscriptions: Mutex<Vec<(Verb, Value)>>,
}

#[async_trait]
impl QuoteGateway for FakeQuotes {
    async fn query_all_instrument(&self, query_type: String) -> Result<Value, GatewayError> {
        Ok(json!({
            "Reply": "QUERYALLINSTRUMENT",
            "Success": "OK",
            "Type": query_type,
            "Instruments": ["TC.F.TWF.FITX.HOT"],
        }))
    }

    async fn query_instrument_info(&self, symbol: String) -> Result<Value, GatewayError> {
        if symbol == "NOPE" {
            return Err(GatewayError::Gateway("unknown symbol".to_string()));
        }
        Ok(json!({"Reply": "QUERYINSTRUMENTINFO", "Success": "OK", "Symbol": symbol}))
    }

    async fn subscribe(&self, verb: Verb, param: Value) -> Result<bool, GatewayError> {
        let accepted = param["Symbol"] != "BAD";
        self.subscriptions.lock().push((verb, param));
        Ok(accepted)
    }

    fn get_histories(&self, window: HistoryWindow) -> HistoryStream {
        let records: Vec<Result<HistoryRecord, GatewayError>> = (1..=3)
            .map(|i| {
                let mut row = Map::new();
                row.insert("Close".to_string(), json!((100 + i).to_string()));
                row.insert("QryIndex".to_string(), json!(i.to_string()));
                Ok(HistoryRecord::from_row(&window, row))
            })
            .collect();
        Box::pin(stream::iter(records))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    addr: SocketAddr,
    hub: Arc<ConnectionHub>,
    gateway: Arc<FakeQuotes>,
    cancel: CancellationToken,
}

impl Harness {
    async fn start(announce_connections: bool) -> Self {
        let hub = Arc::new(ConnectionHub::new(HubConfig {
            client_buffer: 64,
            announce_connections,
        }));
        let gateway = Arc::new(FakeQuotes::default());
        let server = FanOutServer::new(
            Arc::clone(&gateway) as Arc<dyn QuoteGateway>,
            Arc::clone(&hub),
            AccessToken::new(hash_token(SECRET)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            server.serve(listener, shutdown).await.unwrap();
        });

        Self {
            addr,
            hub,
            gateway,
            cancel,
        }
    }

    async fn connect(&self) -> Ws {
        let url = format!("ws://{}/?token={}", self.addr, hash_token(SECRET));
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn wait_for_clients(&self, expected: usize) {
        timeout(Duration::from_secs(2), async {
            while self.hub.len() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {expected} clients, have {}", self.hub.len()));
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_text(ws: &mut Ws) -> String {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return text.as_str().to_owned();
        }
    }
}

async fn next_json(ws: &mut Ws) -> Value {
    serde_json::from_str(&next_text(ws).await).unwrap()
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn rejects_wrong_token() {
    let harness = Harness::start(false).await;
    let url = format!("ws://{}/?token=wrong", harness.addr);

    let err = connect_async(url).await.unwrap_err();

    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert!(harness.hub.is_empty());
}

#[tokio::test]
async fn rejects_missing_token() {
    let harness = Harness::start(false).await;

    let err = connect_async(format!("ws://{}/", harness.addr)).await.unwrap_err();

    assert!(matches!(err, tungstenite::Error::Http(_)));
}

#[tokio::test]
async fn accepts_any_path() {
    let harness = Harness::start(false).await;
    let url = format!("ws://{}/quotes/live?token={}", harness.addr, hash_token(SECRET));

    let (mut ws, _) = connect_async(url).await.unwrap();
    send_json(&mut ws, json!({"Request": "QUERYINSTRUMENTINFO", "Symbol": "X"})).await;

    assert_eq!(next_json(&mut ws).await["Symbol"], "X");
}

// =============================================================================
// Command Routing
// =============================================================================

#[tokio::test]
async fn subquote_reply_reflects_acceptance() {
    let harness = Harness::start(false).await;
    let mut ws = harness.connect().await;

    send_json(
        &mut ws,
        json!({"Request": "SUBQUOTE", "Param": {"Symbol": "TC.F.TWF.FITX.HOT", "SubDataType": "REALTIME"}}),
    )
    .await;
    assert_eq!(next_json(&mut ws).await, json!({"Reply": "SUBQUOTE", "Success": "OK"}));

    send_json(&mut ws, json!({"Request": "UNSUBQUOTE", "Param": {"Symbol": "BAD"}})).await;
    assert_eq!(next_json(&mut ws).await, json!({"Reply": "UNSUBQUOTE", "Success": "FAIL"}));

    let subscriptions = harness.gateway.subscriptions.lock().clone();
    assert_eq!(subscriptions[0].0, Verb::SubQuote);
    assert_eq!(subscriptions[0].1["SubDataType"], "REALTIME");
    assert_eq!(subscriptions[1].0, Verb::UnsubQuote);
}

#[tokio::test]
async fn query_replies_only_to_sender() {
    let harness = Harness::start(false).await;
    let mut asker = harness.connect().await;
    let mut bystander = harness.connect().await;
    harness.wait_for_clients(2).await;

    send_json(&mut asker, json!({"Request": "QUERYALLINSTRUMENT", "Type": "Fut"})).await;
    assert_eq!(next_json(&mut asker).await["Type"], "Fut");

    harness.hub.broadcast("marker");
    assert_eq!(next_text(&mut bystander).await, "marker");
}

#[tokio::test]
async fn gateway_error_is_sent_as_text() {
    let harness = Harness::start(false).await;
    let mut ws = harness.connect().await;

    send_json(&mut ws, json!({"Request": "QUERYINSTRUMENTINFO", "Symbol": "NOPE"})).await;

    assert!(next_text(&mut ws).await.contains("unknown symbol"));
}

#[tokio::test]
async fn history_streams_one_message_per_record() {
    let harness = Harness::start(false).await;
    let mut ws = harness.connect().await;

    send_json(
        &mut ws,
        json!({"Request": "GETHISDATA", "Param": {
            "Symbol": "TC.F.TWF.FITX.HOT",
            "SubDataType": "1K",
            "StartTime": "2024010100",
            "EndTime": "2024010200",
        }}),
    )
    .await;

    for close in ["101", "102", "103"] {
        let record = next_json(&mut ws).await;
        assert_eq!(record["DataType"], "1K");
        assert_eq!(record["HisData"]["Symbol"], "TC.F.TWF.FITX.HOT");
        assert_eq!(record["HisData"]["Close"], close);
    }
}

#[tokio::test]
async fn garbage_does_not_close_connection() {
    let harness = Harness::start(false).await;
    let mut ws = harness.connect().await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut ws, json!({"Request": "LOGIN"})).await;
    send_json(&mut ws, json!({"Request": "QUERYINSTRUMENTINFO", "Symbol": "Y"})).await;

    assert_eq!(next_json(&mut ws).await["Symbol"], "Y");
    assert_eq!(harness.hub.len(), 1);
}

// =============================================================================
// Broadcast and Lifecycle
// =============================================================================

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let harness = Harness::start(false).await;
    let mut clients = vec![
        harness.connect().await,
        harness.connect().await,
        harness.connect().await,
    ];
    harness.wait_for_clients(3).await;

    let quote = json!({"DataType": "REALTIME", "Quote": {"Symbol": "TC.F.TWF.FITX.HOT"}});
    let stats = harness.hub.broadcast_json(&quote);
    assert_eq!(stats.delivered, 3);

    for ws in &mut clients {
        assert_eq!(next_json(ws).await, quote);
    }
}

#[tokio::test]
async fn connection_count_is_announced() {
    let harness = Harness::start(true).await;

    let mut first = harness.connect().await;
    assert_eq!(next_json(&mut first).await, json!({"Reply": "CONNECTIONS", "count": 1}));

    let mut second = harness.connect().await;
    assert_eq!(next_json(&mut second).await, json!({"Reply": "CONNECTIONS", "count": 2}));
    assert_eq!(next_json(&mut first).await, json!({"Reply": "CONNECTIONS", "count": 2}));
}

#[tokio::test]
async fn departed_clients_leave_live_set() {
    let harness = Harness::start(false).await;
    let mut first = harness.connect().await;
    let mut second = harness.connect().await;
    let third = harness.connect().await;
    harness.wait_for_clients(3).await;

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();
    harness.wait_for_clients(1).await;

    // Abrupt drop without a close frame.
    drop(third);
    harness.wait_for_clients(0).await;

    assert_eq!(harness.hub.broadcast("anyone?").delivered, 0);
}
