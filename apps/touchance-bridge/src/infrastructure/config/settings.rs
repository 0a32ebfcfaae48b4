//! Bridge Configuration Settings
//!
//! Loaded from environment variables (after `.env`). Unset variables fall
//! back to defaults; a set but unparseable value is an error rather than a
//! silent default.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::history::HistoryPolicy;
use crate::domain::session::GatewayKind;
use crate::infrastructure::broadcast::HubConfig;
use crate::infrastructure::gateway::{GatewayClientConfig, ServiceCredentials};
use crate::infrastructure::proxy::{ProxyConfig, ReconnectConfig};

/// A value that must never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plain value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Gateway host.
    pub host: String,
    /// Quote service request port.
    pub quote_port: u16,
    /// Trade service request port.
    pub trade_port: u16,
    /// `SystemName` presented at LOGIN.
    pub system_name: String,
    /// `ServiceKey` presented at LOGIN.
    pub service_key: Option<Secret>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            quote_port: GatewayKind::Quote.default_port(),
            trade_port: GatewayKind::Trade.default_port(),
            system_name: "ZMQ".to_string(),
            service_key: None,
        }
    }
}

/// Listener and token settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Fan-out server host; also the relay's upstream host.
    pub host: String,
    /// Fan-out server port.
    pub port: u16,
    /// Relay port.
    pub proxy_port: u16,
    /// Health and metrics port.
    pub health_port: u16,
    /// Access token of the fan-out server.
    pub server_token: Option<Secret>,
    /// Access token of the relay.
    pub proxy_token: Option<Secret>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            proxy_port: 8001,
            health_port: 8082,
            server_token: None,
            proxy_token: None,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Gateway connection.
    pub gateway: GatewaySettings,
    /// Listeners and tokens.
    pub server: ServerSettings,
    /// History paging retry policy.
    pub history: HistoryPolicy,
    /// Per-client queue and connection announcements.
    pub broadcast: HubConfig,
    /// Relay upstream retry delay.
    pub proxy_reconnect_delay: Duration,
}

impl BridgeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value or a
    /// secret is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`BridgeConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let gateway_defaults = GatewaySettings::default();
        let server_defaults = ServerSettings::default();
        let history_defaults = HistoryPolicy::default();
        let hub_defaults = HubConfig::default();

        let gateway = GatewaySettings {
            host: env.string("TCORE_HOST", &gateway_defaults.host),
            quote_port: env.parse("TCORE_QUOTE_PORT", gateway_defaults.quote_port)?,
            trade_port: env.parse("TCORE_TRADE_PORT", gateway_defaults.trade_port)?,
            system_name: env.string("TCORE_SYSTEM_NAME", &gateway_defaults.system_name),
            service_key: env.secret("TCORE_SERVICE_KEY")?,
        };

        let server = ServerSettings {
            host: env.string("SERVER_HOST", &server_defaults.host),
            port: env.parse("SERVER_PORT", server_defaults.port)?,
            proxy_port: env.parse("PROXY_PORT", server_defaults.proxy_port)?,
            health_port: env.parse("BRIDGE_HEALTH_PORT", server_defaults.health_port)?,
            server_token: env.secret("SERVER_TOKEN")?,
            proxy_token: env.secret("PROXY_TOKEN")?,
        };

        let history = HistoryPolicy {
            retry_budget: env.parse("HISTORY_RETRY_BUDGET", history_defaults.retry_budget)?,
            backoff: env.millis("HISTORY_BACKOFF_MS", history_defaults.backoff)?,
        };

        let broadcast = HubConfig {
            client_buffer: env.parse("BRIDGE_CLIENT_BUFFER", hub_defaults.client_buffer)?,
            announce_connections: env
                .parse("BRIDGE_ANNOUNCE_CONNECTIONS", hub_defaults.announce_connections)?,
        };

        Ok(Self {
            gateway,
            server,
            history,
            broadcast,
            proxy_reconnect_delay: env
                .millis("PROXY_RECONNECT_DELAY_MS", ReconnectConfig::default().delay)?,
        })
    }

    /// Check what `server` mode needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] for the first absent value.
    pub fn require_server(&self) -> Result<(), ConfigError> {
        require(self.gateway.service_key.as_ref(), "TCORE_SERVICE_KEY")?;
        require(self.server.server_token.as_ref(), "SERVER_TOKEN")?;
        Ok(())
    }

    /// Check what `proxy` mode needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] for the first absent value.
    pub fn require_proxy(&self) -> Result<(), ConfigError> {
        require(self.server.server_token.as_ref(), "SERVER_TOKEN")?;
        require(self.server.proxy_token.as_ref(), "PROXY_TOKEN")?;
        Ok(())
    }

    /// Session client configuration for the `kind` service.
    ///
    /// # Errors
    ///
    /// Returns an error if `TCORE_SERVICE_KEY` is not set.
    pub fn gateway_client(&self, kind: GatewayKind) -> Result<GatewayClientConfig, ConfigError> {
        let key = require(self.gateway.service_key.as_ref(), "TCORE_SERVICE_KEY")?;
        let credentials = ServiceCredentials::new(&self.gateway.system_name, key.expose());

        let mut config = GatewayClientConfig::new(kind, credentials);
        config.host.clone_from(&self.gateway.host);
        config.port = match kind {
            GatewayKind::Quote => self.gateway.quote_port,
            GatewayKind::Trade => self.gateway.trade_port,
        };
        config.history = self.history;
        Ok(config)
    }

    /// Relay configuration pointed at the fan-out server.
    ///
    /// # Errors
    ///
    /// Returns an error if `SERVER_TOKEN` is not set.
    pub fn proxy(&self) -> Result<ProxyConfig, ConfigError> {
        let token = require(self.server.server_token.as_ref(), "SERVER_TOKEN")?;
        let mut config = ProxyConfig::new(&self.server.host, self.server.port, token.expose());
        config.reconnect = ReconnectConfig::fixed(self.proxy_reconnect_delay);
        Ok(config)
    }

    /// Listen address of the fan-out server. `SERVER_HOST` only names the
    /// server for the relay; the server itself listens on all interfaces.
    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.server.port))
    }

    /// Listen address of the relay.
    #[must_use]
    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.server.proxy_port))
    }
}

/// Log the effective configuration with secrets redacted.
pub fn log_config(config: &BridgeConfig) {
    tracing::info!(
        gateway_host = %config.gateway.host,
        quote_port = config.gateway.quote_port,
        trade_port = config.gateway.trade_port,
        system_name = %config.gateway.system_name,
        service_key_set = config.gateway.service_key.is_some(),
        "Gateway configuration"
    );
    tracing::info!(
        server_host = %config.server.host,
        server_port = config.server.port,
        proxy_port = config.server.proxy_port,
        health_port = config.server.health_port,
        server_token_set = config.server.server_token.is_some(),
        proxy_token_set = config.server.proxy_token.is_some(),
        client_buffer = config.broadcast.client_buffer,
        announce_connections = config.broadcast.announce_connections,
        "Server configuration"
    );
    tracing::info!(
        history_retry_budget = config.history.retry_budget,
        history_backoff_ms = u64::try_from(config.history.backoff.as_millis()).unwrap_or(u64::MAX),
        proxy_reconnect_ms =
            u64::try_from(config.proxy_reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        "Retry configuration"
    );
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn require<'a>(secret: Option<&'a Secret>, key: &str) -> Result<&'a Secret, ConfigError> {
    secret.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.is_empty() => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).filter(|v| !v.is_empty()).map_or(Ok(default), |v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v,
                })
        })
    }

    fn secret(&self, key: &str) -> Result<Option<Secret>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) if v.is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(Some(Secret(v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.quote_port, 51237);
        assert_eq!(config.gateway.trade_port, 51207);
        assert_eq!(config.gateway.system_name, "ZMQ");
        assert!(config.gateway.service_key.is_none());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.proxy_port, 8001);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.history.retry_budget, 30);
        assert_eq!(config.history.backoff, Duration::from_secs(1));
        assert_eq!(config.broadcast.client_buffer, 1024);
        assert!(config.broadcast.announce_connections);
        assert_eq!(config.proxy_reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn overrides_from_environment() {
        let config = load(&[
            ("TCORE_HOST", "10.1.1.1"),
            ("TCORE_QUOTE_PORT", "6000"),
            ("HISTORY_RETRY_BUDGET", "5"),
            ("HISTORY_BACKOFF_MS", "250"),
            ("BRIDGE_ANNOUNCE_CONNECTIONS", "false"),
            ("PROXY_RECONNECT_DELAY_MS", "50"),
        ])
        .unwrap();

        assert_eq!(config.gateway.host, "10.1.1.1");
        assert_eq!(config.gateway.quote_port, 6000);
        assert_eq!(config.history.retry_budget, 5);
        assert_eq!(config.history.backoff, Duration::from_millis(250));
        assert!(!config.broadcast.announce_connections);
        assert_eq!(config.proxy_reconnect_delay, Duration::from_millis(50));
    }

    #[test]
    fn unparseable_value_is_rejected() {
        let err = load(&[("SERVER_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SERVER_PORT"));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = load(&[("SERVER_TOKEN", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref key) if key == "SERVER_TOKEN"));
    }

    #[test]
    fn server_mode_requirements() {
        let err = load(&[("SERVER_TOKEN", "t")]).unwrap().require_server().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "TCORE_SERVICE_KEY"));

        let config = load(&[("SERVER_TOKEN", "t"), ("TCORE_SERVICE_KEY", "k")]).unwrap();
        assert!(config.require_server().is_ok());
    }

    #[test]
    fn proxy_mode_requirements() {
        let err = load(&[("SERVER_TOKEN", "t")]).unwrap().require_proxy().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "PROXY_TOKEN"));
    }

    #[test]
    fn gateway_client_uses_kind_port() {
        let config = load(&[("TCORE_SERVICE_KEY", "k"), ("TCORE_TRADE_PORT", "7000")]).unwrap();

        let trade = config.gateway_client(GatewayKind::Trade).unwrap();
        assert_eq!(trade.port, 7000);
        assert_eq!(trade.credentials.service_key, "k");

        let quote = config.gateway_client(GatewayKind::Quote).unwrap();
        assert_eq!(quote.port, 51237);
    }

    #[test]
    fn proxy_points_at_server() {
        let config = load(&[("SERVER_HOST", "10.0.0.2"), ("SERVER_TOKEN", "tok")]).unwrap();
        let proxy = config.proxy().unwrap();
        assert_eq!(proxy.upstream_url(), "ws://10.0.0.2:8000?token=tok");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = load(&[("TCORE_SERVICE_KEY", "super-secret")]).unwrap();
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn listeners_bind_all_interfaces() {
        let config = load(&[("SERVER_HOST", "bridge.internal"), ("PROXY_PORT", "9001")]).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.proxy_addr(), "0.0.0.0:9001".parse().unwrap());
    }
}
