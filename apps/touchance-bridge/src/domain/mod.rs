//! Domain Layer - Gateway session and market data types.
//!
//! This layer contains the core domain types of the gateway protocol
//! with no I/O. All types here are pure Rust with serialization support.

/// History window, record and paging policy.
pub mod history;

/// New-order reject codes.
pub mod order;

/// Session state, request verbs and gateway kinds.
pub mod session;
