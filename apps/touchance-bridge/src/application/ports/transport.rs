//! Socket ports to the gateway.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure on a gateway socket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect the socket.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Underlying error text.
        reason: String,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Recv(String),

    /// The peer or the socket is gone.
    #[error("channel closed")]
    Closed,
}

/// TCP endpoint of a gateway socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Request/reply socket.
///
/// Replies carry no correlation ID, so a request and its reply must be
/// exchanged without interleaving. Holders serialize access; `&mut self`
/// makes that visible in the signature.
#[async_trait]
pub trait RequestChannel: Send {
    /// Write one request frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Read one reply frame.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Subscription to the gateway's publish socket.
#[async_trait]
pub trait PushChannel: Send {
    /// Read the next pushed frame.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Opens gateway sockets.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open a request/reply socket.
    async fn request(&self, endpoint: &Endpoint) -> Result<Box<dyn RequestChannel>, TransportError>;

    /// Open a push subscription receiving every topic.
    async fn subscribe(&self, endpoint: &Endpoint) -> Result<Box<dyn PushChannel>, TransportError>;
}
