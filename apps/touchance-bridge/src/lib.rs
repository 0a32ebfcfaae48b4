#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Touchance Bridge - Gateway Session Multiplexer
//!
//! Holds one session with a Touchance (TCore) gateway over ZMQ and shares
//! it with many WebSocket clients. Client commands are routed through the
//! single session; pushed market data is broadcast to everyone.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Gateway protocol types with no I/O
//!   - `session`: verbs, gateway kinds, session state and LOGIN reply
//!   - `history`: history windows, records and paging policy
//!   - `order`: new-order reject codes
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: gateway sockets, quote operations
//!   - `services`: history paging with retry and backoff
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: session client, codec, emitter, push subscriber, ZMQ transport
//!   - `broadcast`: live connection set
//!   - `server`: WebSocket fan-out server and command routing
//!   - `proxy`: pass-through relay
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                        ┌───────────────┐  commands   ┌──────────────┐
//! TCore REQ/REP  ◄──────►│               │◄────────────│              │◄──► Client 1
//!                        │ GatewayClient │             │ FanOutServer │◄──► Client 2
//! TCore PUB ────────────►│               │────────────►│              │◄──► Proxy ◄──► Client N
//!                        └───────────────┘  broadcast  └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Gateway protocol types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::history::{HistoryPolicy, HistoryRecord, HistoryWindow};
pub use domain::session::{ConnectionInfo, GatewayKind, SessionState, Verb};

// Ports
pub use application::ports::{
    Endpoint, GatewayConnector, GatewayError, HistoryStream, PushChannel, QuoteGateway,
    RequestChannel, TransportError,
};
pub use application::services::{HistoryPager, HistorySource};

// Gateway client
pub use infrastructure::gateway::{
    FrameCodec, GatewayClient, GatewayClientConfig, GatewayRequest, ServiceCredentials,
    ZmqConnector,
};

// Fan-out and relay
pub use infrastructure::broadcast::{ConnectionHub, HubConfig};
pub use infrastructure::proxy::{ProxyConfig, ProxyRelay, UpstreamForwarder};
pub use infrastructure::server::{AccessToken, FanOutServer, hash_token};

// Infrastructure config
pub use infrastructure::config::{BridgeConfig, ConfigError, Secret};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState, UpstreamStatus};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
