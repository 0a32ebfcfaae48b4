//! Touchance Gateway Adapters
//!
//! Session client for the gateway's quote and trade services:
//!
//! - **Codec**: NUL-terminated, optionally topic-prefixed JSON frames
//! - **Emitter**: instance-scoped event listeners
//! - **Client**: locked request/reply, LOGIN/LOGOUT/PONG, error classification
//! - **Subscriber**: cancellable push receive loop
//! - **ZMQ**: REQ/SUB socket transport

pub mod client;
pub mod codec;
pub mod emitter;
pub mod quote;
pub mod request;
pub mod subscriber;
pub mod trade;
pub mod zmq;

pub use client::{
    GatewayClient, GatewayClientConfig, MESSAGE, Message, PING, PING_ID, ServiceCredentials,
};
pub use codec::{CodecError, FrameCodec};
pub use emitter::{Dispatch, EventEmitter, Listener};
pub use quote::DEFAULT_GREEKS_TYPE;
pub use request::{GatewayRequest, SESSION_ILLEGAL, classify_reply};
pub use subscriber::{Frame, PushSubscriber, RECV_MESSAGE, STOP_SENTINEL, is_stop_frame};
pub use zmq::ZmqConnector;
