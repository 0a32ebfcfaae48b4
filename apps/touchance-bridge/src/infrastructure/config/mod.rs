//! Configuration Module
//!
//! Environment-driven settings for the bridge, the relay and the health
//! server.

mod settings;

pub use settings::{
    BridgeConfig, ConfigError, GatewaySettings, Secret, ServerSettings, log_config,
};
