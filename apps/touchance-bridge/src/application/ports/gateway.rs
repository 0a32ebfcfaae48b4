//! Gateway errors and the quote operations used by the fan-out server.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use super::transport::TransportError;
use crate::domain::history::{HistoryRecord, HistoryWindow};
use crate::domain::session::Verb;

/// Lazy sequence of history records.
pub type HistoryStream = BoxStream<'static, Result<HistoryRecord, GatewayError>>;

/// Errors from a gateway request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway invalidated the session. Reconnect before retrying.
    #[error("session is illegal: {0}")]
    SessionIllegal(String),

    /// A SUBQUOTE or UNSUBQUOTE was rejected.
    #[error("subscribe failed: {0}")]
    SubscribeFailure(String),

    /// A NEWORDER was rejected with a known code.
    #[error("new order rejected ({code}): {reason}")]
    NewOrderFailure {
        /// Gateway `ErrCode`.
        code: String,
        /// Reason for the code.
        reason: &'static str,
    },

    /// A NEWORDER was rejected with a code outside the reject table.
    #[error("new order rejected with unmapped code {code}")]
    UnknownOrderError {
        /// Gateway `ErrCode`.
        code: String,
    },

    /// Any other rejected request.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The verb is outside this client's capability set.
    #[error("{verb} is not supported by the {kind} gateway")]
    Unsupported {
        /// Requested verb.
        verb: Verb,
        /// Gateway kind label.
        kind: &'static str,
    },

    /// No request socket is open.
    #[error("not connected to gateway")]
    NotConnected,

    /// Socket failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the session must be re-established.
    #[must_use]
    pub const fn is_session_illegal(&self) -> bool {
        matches!(self, Self::SessionIllegal(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionIllegal(_) => "session_illegal",
            Self::SubscribeFailure(_) => "subscribe_failure",
            Self::NewOrderFailure { .. } => "new_order_failure",
            Self::UnknownOrderError { .. } => "unknown_order_error",
            Self::Gateway(_) => "gateway",
            Self::Unsupported { .. } => "unsupported",
            Self::NotConnected => "not_connected",
            Self::Transport(_) => "transport",
            Self::Encode(_) => "encode",
        }
    }
}

/// Quote operations routed from downstream clients.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteGateway: Send + Sync {
    /// List instruments of a type (`Fut`, `Opt`, `Fut2`, ...).
    async fn query_all_instrument(&self, query_type: String) -> Result<Value, GatewayError>;

    /// Look up one instrument.
    async fn query_instrument_info(&self, symbol: String) -> Result<Value, GatewayError>;

    /// Send a SUBQUOTE/UNSUBQUOTE and report whether it was accepted.
    async fn subscribe(&self, verb: Verb, param: Value) -> Result<bool, GatewayError>;

    /// Page through a history window.
    fn get_histories(&self, window: HistoryWindow) -> HistoryStream;
}
