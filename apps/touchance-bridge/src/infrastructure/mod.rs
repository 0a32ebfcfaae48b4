//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Touchance gateway session client and ZMQ transport.
pub mod gateway;

/// Live connection set and best-effort fan-out.
pub mod broadcast;

/// WebSocket fan-out server and client command routing.
pub mod server;

/// Pass-through relay in front of a fan-out server.
pub mod proxy;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
