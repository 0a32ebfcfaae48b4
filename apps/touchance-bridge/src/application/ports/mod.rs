//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RequestChannel`: request/reply socket to the gateway
//! - `PushChannel`: publish socket subscription
//! - `GatewayConnector`: opens both channel kinds
//!
//! ## Driver Ports (Inbound)
//!
//! - `QuoteGateway`: quote operations the fan-out server routes client
//!   commands to

mod gateway;
mod transport;

pub use gateway::{GatewayError, HistoryStream, QuoteGateway};
#[cfg(test)]
pub use gateway::MockQuoteGateway;
pub use transport::{Endpoint, GatewayConnector, PushChannel, RequestChannel, TransportError};
