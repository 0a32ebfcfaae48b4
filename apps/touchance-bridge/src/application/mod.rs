//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (gateway sockets, quote operations).
pub mod ports;

/// Application services (history paging).
pub mod services;
