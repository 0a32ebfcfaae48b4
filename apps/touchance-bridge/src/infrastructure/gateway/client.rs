//! Gateway Session Client
//!
//! Owns the request/reply socket to one gateway service and the push
//! subscription that comes with its session.
//!
//! # Request Discipline
//!
//! The socket has no request IDs: a reply belongs to whichever request was
//! written last. The socket therefore lives inside a `tokio::sync::Mutex`
//! and the guard is held from the write until the reply has been read, so
//! at most one request is in flight. Replies are decoded and classified
//! after the guard is released.
//!
//! # Events
//!
//! ```text
//! PushSubscriber ──RECV_MESSAGE──► frames (sequential) ──► decode
//!                                                            │
//!                       events (concurrent) ◄── MESSAGE / <DataType>
//!                                                            │
//!                                   DataType == PING ──► spawn pong("TC")
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use super::emitter::{Dispatch, EventEmitter};
use super::request::{GatewayRequest, classify_reply};
use super::subscriber::{Frame, PushSubscriber, RECV_MESSAGE};
use crate::application::ports::{
    Endpoint, GatewayConnector, GatewayError, PushChannel, RequestChannel,
};
use crate::domain::history::HistoryPolicy;
use crate::domain::session::{ConnectionInfo, GatewayKind, SUCCESS_OK, SessionState, Verb};
use crate::infrastructure::metrics;

/// Decoded-tier event carrying every pushed message.
pub const MESSAGE: &str = "MESSAGE";

/// `DataType` of keep-alive pushes.
pub const PING: &str = "PING";

/// ID sent in the PONG answering a PING push.
pub const PING_ID: &str = "TC";

/// A decoded pushed message.
pub type Message = Arc<Value>;

// =============================================================================
// Configuration
// =============================================================================

/// Application identity presented at LOGIN.
#[derive(Clone)]
pub struct ServiceCredentials {
    /// `SystemName` field.
    pub system_name: String,
    /// `ServiceKey` shared secret.
    pub service_key: String,
}

impl ServiceCredentials {
    /// Create credentials.
    #[must_use]
    pub fn new(system_name: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            service_key: service_key.into(),
        }
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("system_name", &self.system_name)
            .field("service_key", &"[REDACTED]")
            .finish()
    }
}

/// Gateway client configuration.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    /// Service kind; decides the default port and the allowed verbs.
    pub kind: GatewayKind,
    /// Gateway host.
    pub host: String,
    /// Request socket port.
    pub port: u16,
    /// LOGIN identity.
    pub credentials: ServiceCredentials,
    /// History retry policy.
    pub history: HistoryPolicy,
}

impl GatewayClientConfig {
    /// Configuration for a local gateway on the kind's default port.
    #[must_use]
    pub fn new(kind: GatewayKind, credentials: ServiceCredentials) -> Self {
        Self {
            kind,
            host: "127.0.0.1".to_string(),
            port: kind.default_port(),
            credentials,
            history: HistoryPolicy::default(),
        }
    }

    /// Request socket endpoint.
    #[must_use]
    pub fn request_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

// =============================================================================
// Client
// =============================================================================

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<Option<Box<dyn PushChannel>>>,
}

#[derive(Default)]
struct SubscriberSlot {
    channel: Option<Box<dyn PushChannel>>,
    running: Option<RunningLoop>,
}

impl SubscriberSlot {
    /// Cancel the running loop, wait for it, and keep its channel.
    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        match running.handle.await {
            Ok(channel) => self.channel = channel,
            Err(e) => tracing::warn!(error = %e, "Push subscriber task failed"),
        }
    }
}

/// Client for one gateway service.
pub struct GatewayClient {
    config: GatewayClientConfig,
    connector: Arc<dyn GatewayConnector>,
    codec: FrameCodec,
    socket: Mutex<Option<Box<dyn RequestChannel>>>,
    info: RwLock<Option<ConnectionInfo>>,
    state: RwLock<SessionState>,
    frames: Arc<EventEmitter<Frame>>,
    events: EventEmitter<Message>,
    subscriber: Mutex<SubscriberSlot>,
    me: Weak<Self>,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: GatewayClientConfig, connector: Arc<dyn GatewayConnector>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let frames = Arc::new(EventEmitter::new(Dispatch::Sequential));
            let client = me.clone();
            frames.on_async(RECV_MESSAGE, move |frame: Frame| {
                let client = client.clone();
                async move {
                    if let Some(client) = client.upgrade() {
                        let message = client.codec.decode(&frame);
                        client.receive(message).await;
                    }
                }
            });

            Self {
                config,
                connector,
                codec: FrameCodec::new(),
                socket: Mutex::new(None),
                info: RwLock::new(None),
                state: RwLock::new(SessionState::Disconnected),
                frames,
                events: EventEmitter::new(Dispatch::Concurrent),
                subscriber: Mutex::new(SubscriberSlot::default()),
                me: me.clone(),
            }
        })
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayClientConfig {
        &self.config
    }

    /// Service kind.
    #[must_use]
    pub const fn kind(&self) -> GatewayKind {
        self.config.kind
    }

    pub(crate) fn arc(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Session lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the last LOGIN was accepted and no LOGOUT followed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.info.read().as_ref().is_some_and(ConnectionInfo::is_connected)
    }

    /// The last LOGIN or LOGOUT reply.
    #[must_use]
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.info.read().clone()
    }

    /// Session key of the current session.
    #[must_use]
    pub fn session_key(&self) -> Option<String> {
        self.info
            .read()
            .as_ref()
            .and_then(|info| info.session_key().map(str::to_string))
    }

    /// Push socket port of the current session.
    #[must_use]
    pub fn sub_port(&self) -> Option<u16> {
        self.info.read().as_ref().and_then(ConnectionInfo::sub_port)
    }

    /// Open the request socket and log in.
    ///
    /// Returns whether the gateway accepted the LOGIN. A previous session's
    /// push subscriber is stopped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or the LOGIN request
    /// fails.
    pub async fn connect(&self) -> Result<bool, GatewayError> {
        {
            let mut slot = self.subscriber.lock().await;
            slot.stop().await;
            slot.channel = None;
        }

        *self.state.write() = SessionState::Connecting;
        let result = self.login().await;
        let connected = matches!(result, Ok(true));
        *self.state.write() = if connected {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };

        match &result {
            Ok(true) => tracing::info!(
                kind = self.config.kind.as_str(),
                endpoint = %self.config.request_endpoint(),
                sub_port = ?self.sub_port(),
                "Gateway session established"
            ),
            Ok(false) => tracing::warn!(
                kind = self.config.kind.as_str(),
                reply = ?self.connection_info().map(|info| info.reply().clone()),
                "Gateway rejected login"
            ),
            Err(e) => tracing::error!(
                kind = self.config.kind.as_str(),
                error = %e,
                "Gateway login failed"
            ),
        }

        result
    }

    async fn login(&self) -> Result<bool, GatewayError> {
        let endpoint = self.config.request_endpoint();
        let channel = self.connector.request(&endpoint).await?;
        *self.socket.lock().await = Some(channel);

        let credentials = &self.config.credentials;
        let request = GatewayRequest::new(Verb::Login).param(json!({
            "SystemName": credentials.system_name,
            "ServiceKey": credentials.service_key,
        }));
        let info = ConnectionInfo::new(self.send(request).await?);
        let connected = info.is_connected();
        *self.info.write() = Some(info);
        Ok(connected)
    }

    /// Log in again and restart the push subscriber on the new sub port.
    ///
    /// Returns whether the gateway accepted the LOGIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the LOGIN request fails or the push socket cannot
    /// be opened.
    pub async fn reconnect(&self) -> Result<bool, GatewayError> {
        if !self.connect().await? {
            return Ok(false);
        }
        self.serve().await?;
        Ok(true)
    }

    /// Log out and stop the push subscriber.
    ///
    /// Teardown is best effort: a failed LOGOUT is logged and the call still
    /// returns `true`.
    pub async fn disconnect(&self) -> bool {
        let has_socket = self.socket.lock().await.is_some();
        if has_socket {
            match self.send(GatewayRequest::new(Verb::Logout)).await {
                Ok(reply) => *self.info.write() = Some(ConnectionInfo::new(reply)),
                Err(e) => tracing::warn!(error = %e, "Gateway logout failed"),
            }
        }

        self.stop_serving().await;
        *self.socket.lock().await = None;
        *self.state.write() = SessionState::Disconnected;
        tracing::info!(kind = self.config.kind.as_str(), "Gateway session closed");
        true
    }

    fn invalidate_session(&self) {
        *self.info.write() = None;
        *self.state.write() = SessionState::Disconnected;
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send one request and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unsupported`] for verbs outside this client's
    /// kind, [`GatewayError::NotConnected`] without a socket, transport
    /// errors, and the classified error of a rejected reply. A session
    /// error or a transport failure ends the session.
    pub async fn send(&self, request: GatewayRequest) -> Result<Value, GatewayError> {
        let verb = request.verb();
        if !self.config.kind.allows(verb) {
            return Err(GatewayError::Unsupported {
                verb,
                kind: self.config.kind.as_str(),
            });
        }

        let frame = serde_json::to_vec(&request.to_value(self.session_key().as_deref()))?;
        let started = Instant::now();

        let raw = {
            let mut slot = self.socket.lock().await;
            let channel = slot.as_mut().ok_or(GatewayError::NotConnected)?;
            let exchanged = match channel.send(frame).await {
                Ok(()) => channel.recv().await,
                Err(e) => Err(e),
            };
            match exchanged {
                Ok(raw) => raw,
                Err(e) => {
                    // A REQ socket is unusable after a half-finished exchange.
                    *slot = None;
                    drop(slot);
                    self.invalidate_session();
                    metrics::record_request_error("transport");
                    return Err(e.into());
                }
            }
        };

        metrics::record_request(verb.as_str(), started.elapsed());
        let reply = self.codec.decode(&raw);

        if let Err(e) = classify_reply(verb, &reply) {
            metrics::record_request_error(e.kind());
            if e.is_session_illegal() {
                tracing::warn!(verb = %verb, error = %e, "Gateway invalidated session");
                self.invalidate_session();
            }
            return Err(e);
        }

        Ok(reply)
    }

    /// Answer a keep-alive with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn pong(&self, id: &str) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::Pong).field("ID", id)).await
    }

    /// Look up one instrument.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn query_instrument_info(&self, symbol: &str) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::QueryInstrumentInfo).field("Symbol", symbol))
            .await
    }

    /// List instruments of a type (`Fut`, `Opt`, `Fut2`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn query_all_instrument(&self, query_type: &str) -> Result<Value, GatewayError> {
        self.send(GatewayRequest::new(Verb::QueryAllInstrument).field("Type", query_type))
            .await
    }

    /// List futures.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn query_all_future(&self) -> Result<Value, GatewayError> {
        self.query_all_instrument("Fut").await
    }

    /// List options.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn query_all_option(&self) -> Result<Value, GatewayError> {
        self.query_all_instrument("Opt").await
    }

    /// List second-generation futures.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn query_all_future2(&self) -> Result<Value, GatewayError> {
        self.query_all_instrument("Fut2").await
    }

    /// Send a subscription verb and report whether it was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SubscribeFailure`] if the gateway explains a
    /// rejection, or any other request error.
    pub async fn subscribe(&self, verb: Verb, param: Value) -> Result<bool, GatewayError> {
        let reply = self.send(GatewayRequest::new(verb).param(param)).await?;
        Ok(reply.get("Reply").and_then(Value::as_str) == Some(verb.as_str())
            && reply.get("Success").and_then(Value::as_str) == Some(SUCCESS_OK))
    }

    // =========================================================================
    // Push Events
    // =========================================================================

    /// Register a decoded-tier listener; `event` is uppercased.
    ///
    /// Listeners run as independent tasks. Use [`MESSAGE`] for every frame
    /// or a `DataType` (`PING`, `REALTIME`, `GREEKS`, ...).
    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.events.on(&event.to_uppercase(), listener);
    }

    /// Register an async decoded-tier listener; `event` is uppercased.
    pub fn on_async<F, Fut>(&self, event: &str, listener: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.events.on_async(&event.to_uppercase(), listener);
    }

    /// Raw-tier emitter; every received frame is emitted under
    /// [`RECV_MESSAGE`].
    #[must_use]
    pub fn frames(&self) -> &EventEmitter<Frame> {
        &self.frames
    }

    /// Dispatch one decoded push message.
    ///
    /// Emits under [`MESSAGE`] and under its `DataType`. A PING is answered
    /// with `pong("TC")` from a detached task.
    pub async fn receive(&self, message: Value) {
        let data_type = message
            .get("DataType")
            .and_then(Value::as_str)
            .map(str::to_string);
        metrics::record_frame(data_type.as_deref().unwrap_or("none"));

        let message = Arc::new(message);
        self.events.emit(MESSAGE, Arc::clone(&message)).await;

        let Some(data_type) = data_type else {
            return;
        };
        self.events.emit(&data_type, message).await;

        if data_type == PING {
            self.spawn_pong();
        }
    }

    fn spawn_pong(&self) {
        let Some(client) = self.arc() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = client.pong(PING_ID).await {
                tracing::warn!(error = %e, "Keep-alive pong failed");
            }
        });
    }

    // =========================================================================
    // Push Subscriber
    // =========================================================================

    /// Start the push subscriber, replacing any running one.
    ///
    /// The previous loop is cancelled and joined before the new one starts.
    /// The push channel is opened on first use at the session's sub-port and
    /// reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] without a session, or a
    /// transport error if the push channel cannot be opened.
    pub async fn serve(&self) -> Result<(), GatewayError> {
        let mut slot = self.subscriber.lock().await;
        slot.stop().await;

        let channel = match slot.channel.take() {
            Some(channel) => channel,
            None => {
                let port = self
                    .sub_port()
                    .filter(|_| self.is_connected())
                    .ok_or(GatewayError::NotConnected)?;
                let endpoint = Endpoint::new(self.config.host.clone(), port);
                tracing::info!(endpoint = %endpoint, "Opening push subscription");
                self.connector.subscribe(&endpoint).await?
            }
        };

        let cancel = CancellationToken::new();
        let subscriber = PushSubscriber::new(channel, Arc::clone(&self.frames), cancel.clone());
        slot.running = Some(RunningLoop {
            cancel,
            handle: tokio::spawn(subscriber.run()),
        });
        Ok(())
    }

    /// Stop the push subscriber if one is running.
    pub async fn stop_serving(&self) {
        self.subscriber.lock().await.stop().await;
    }

    /// Whether a push subscriber is running.
    pub async fn is_serving(&self) -> bool {
        self.subscriber
            .lock()
            .await
            .running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}
