//! Gateway Session Types
//!
//! Request verbs, gateway kinds (quote vs. trade) and the connection info
//! captured from the last LOGIN/LOGOUT reply.
//!
//! # Session Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──LOGIN OK──► Connected
//!       ▲                          │                       │
//!       └────── LOGIN rejected ────┘                       │
//!       └────── LOGOUT / session illegal ──────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Success` value of an accepted reply.
pub const SUCCESS_OK: &str = "OK";

// =============================================================================
// Verbs
// =============================================================================

/// Request verb understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// Open a session.
    Login,
    /// Close the session.
    Logout,
    /// Keep-alive reply to a PING push.
    Pong,
    /// Look up one instrument.
    QueryInstrumentInfo,
    /// List instruments of a type.
    QueryAllInstrument,
    /// Subscribe to realtime, greeks or history data.
    SubQuote,
    /// Cancel a subscription.
    UnsubQuote,
    /// Fetch one page of history.
    GetHisData,
    /// List trading accounts.
    Accounts,
    /// Replay order reports.
    RestoreReport,
    /// Place an order.
    NewOrder,
    /// Amend an order.
    ReplaceOrder,
    /// Cancel an order.
    CancelOrder,
    /// Query account margins.
    Margins,
    /// Query account positions.
    Positions,
    /// Replay fill reports.
    RestoreFillReport,
}

impl Verb {
    /// Wire name of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Pong => "PONG",
            Self::QueryInstrumentInfo => "QUERYINSTRUMENTINFO",
            Self::QueryAllInstrument => "QUERYALLINSTRUMENT",
            Self::SubQuote => "SUBQUOTE",
            Self::UnsubQuote => "UNSUBQUOTE",
            Self::GetHisData => "GETHISDATA",
            Self::Accounts => "ACCOUNTS",
            Self::RestoreReport => "RESTOREREPORT",
            Self::NewOrder => "NEWORDER",
            Self::ReplaceOrder => "REPLACEORDER",
            Self::CancelOrder => "CANCELORDER",
            Self::Margins => "MARGINS",
            Self::Positions => "POSITIONS",
            Self::RestoreFillReport => "RESTOREFILLREPORT",
        }
    }

    /// All verbs, in wire-table order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Login,
            Self::Logout,
            Self::Pong,
            Self::QueryInstrumentInfo,
            Self::QueryAllInstrument,
            Self::SubQuote,
            Self::UnsubQuote,
            Self::GetHisData,
            Self::Accounts,
            Self::RestoreReport,
            Self::NewOrder,
            Self::ReplaceOrder,
            Self::CancelOrder,
            Self::Margins,
            Self::Positions,
            Self::RestoreFillReport,
        ]
    }

    /// Whether the verb subscribes or unsubscribes.
    #[must_use]
    pub const fn is_subscription(self) -> bool {
        matches!(self, Self::SubQuote | Self::UnsubQuote)
    }

    /// Whether the request is sent without a session key.
    #[must_use]
    pub const fn is_login(self) -> bool {
        matches!(self, Self::Login)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known verb.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request verb: {0}")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

// =============================================================================
// Gateway Kind
// =============================================================================

/// Which gateway service a client talks to.
///
/// Quote and trade services share the session verbs and differ only by
/// port and by the verbs they accept on top of those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    /// Market data service.
    Quote,
    /// Order routing service.
    Trade,
}

impl GatewayKind {
    /// Default request port of the service.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Quote => 51237,
            Self::Trade => 51207,
        }
    }

    /// Whether this service accepts the verb.
    #[must_use]
    pub const fn allows(self, verb: Verb) -> bool {
        match verb {
            Verb::Login
            | Verb::Logout
            | Verb::Pong
            | Verb::QueryInstrumentInfo
            | Verb::QueryAllInstrument => true,
            Verb::SubQuote | Verb::UnsubQuote | Verb::GetHisData => matches!(self, Self::Quote),
            Verb::Accounts
            | Verb::RestoreReport
            | Verb::NewOrder
            | Verb::ReplaceOrder
            | Verb::CancelOrder
            | Verb::Margins
            | Verb::Positions
            | Verb::RestoreFillReport => matches!(self, Self::Trade),
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// LOGIN in flight.
    Connecting,
    /// LOGIN accepted.
    Connected,
}

/// The last LOGIN or LOGOUT reply.
///
/// A session key and push port are only meaningful while the stored reply
/// is an accepted LOGIN.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    reply: Value,
}

impl ConnectionInfo {
    /// Wrap a decoded reply.
    #[must_use]
    pub const fn new(reply: Value) -> Self {
        Self { reply }
    }

    /// The raw reply.
    #[must_use]
    pub const fn reply(&self) -> &Value {
        &self.reply
    }

    /// `Reply == "LOGIN" && Success == "OK"`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.reply.get("Reply").and_then(Value::as_str) == Some(Verb::Login.as_str())
            && self.reply.get("Success").and_then(Value::as_str) == Some(SUCCESS_OK)
    }

    /// Session key issued at login.
    #[must_use]
    pub fn session_key(&self) -> Option<&str> {
        self.reply.get("SessionKey").and_then(Value::as_str)
    }

    /// Push socket port announced at login.
    ///
    /// The gateway sends it as a string; numbers are accepted as well.
    #[must_use]
    pub fn sub_port(&self) -> Option<u16> {
        match self.reply.get("SubPort")? {
            Value::String(port) => port.trim().parse().ok(),
            Value::Number(port) => port.as_u64().and_then(|p| u16::try_from(p).ok()),
            _ => None,
        }
    }
}
