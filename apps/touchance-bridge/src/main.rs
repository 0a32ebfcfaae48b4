//! Touchance Bridge Binary
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin touchance-bridge -- server
//! cargo run --bin touchance-bridge -- proxy
//! cargo run --bin touchance-bridge -- hash-token <PLAIN>
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TCORE_SERVICE_KEY`: gateway service key (`server`)
//! - `SERVER_TOKEN`: fan-out server access token (`server`, `proxy`)
//! - `PROXY_TOKEN`: relay access token (`proxy`)
//!
//! ## Optional
//! - `TCORE_HOST`, `TCORE_QUOTE_PORT`, `TCORE_SYSTEM_NAME`: gateway endpoint and identity
//! - `SERVER_HOST`, `SERVER_PORT`: fan-out server address as seen by the relay (default: 127.0.0.1:8000)
//! - `PROXY_PORT`: relay port (default: 8001)
//! - `BRIDGE_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `HISTORY_RETRY_BUDGET`, `HISTORY_BACKOFF_MS`: history paging retries
//! - `BRIDGE_CLIENT_BUFFER`, `BRIDGE_ANNOUNCE_CONNECTIONS`: fan-out tuning
//! - `PROXY_RECONNECT_DELAY_MS`: relay upstream retry delay (default: 1000)
//! - `LOG_FORMAT`, `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use touchance_bridge::infrastructure::config::log_config;
use touchance_bridge::infrastructure::gateway::RECV_MESSAGE;
use touchance_bridge::infrastructure::proxy::{proxy_router, serve_proxy};
use touchance_bridge::infrastructure::server::DEFAULT_BROADCAST_EVENTS;
use touchance_bridge::infrastructure::telemetry;
use touchance_bridge::{
    AccessToken, BridgeConfig, ConnectionHub, FanOutServer, GatewayClient, GatewayKind,
    HealthServer, HealthServerState, ProxyRelay, UpstreamStatus, ZmqConnector, hash_token,
    init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the health view re-reads the gateway session state.
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(author, version, about = "Touchance gateway bridge with WebSocket fan-out")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Hold the gateway session and serve WebSocket clients.
    Server,
    /// Relay a fan-out server to more clients.
    Proxy,
    /// Print the access token derived from a plain-text secret.
    HashToken {
        /// Plain-text secret.
        plain: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let CliCommand::HashToken { plain } = &cli.command {
        println!("{}", hash_token(plain));
        return Ok(());
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    match cli.command {
        CliCommand::Server => run_server(&config, shutdown_token).await,
        CliCommand::Proxy => run_proxy(&config, shutdown_token).await,
        CliCommand::HashToken { .. } => Ok(()),
    }
}

/// Gateway session plus fan-out server.
async fn run_server(config: &BridgeConfig, shutdown_token: CancellationToken) -> anyhow::Result<()> {
    config.require_server()?;
    tracing::info!("Starting Touchance bridge server");

    let hub = Arc::new(ConnectionHub::new(config.broadcast));
    let upstream = Arc::new(UpstreamStatus::default());

    let client = GatewayClient::new(
        config.gateway_client(GatewayKind::Quote)?,
        Arc::new(ZmqConnector::new()),
    );

    let frames_seen = Arc::clone(&upstream);
    client.frames().on(RECV_MESSAGE, move |_| frames_seen.record_message());

    if !client.connect().await.context("gateway login failed")? {
        bail!("gateway rejected login");
    }
    client.serve().await.context("failed to start push subscriber")?;
    upstream.set_connected(client.is_connected());

    let server = FanOutServer::new(
        Arc::clone(&client) as _,
        Arc::clone(&hub),
        server_token(config)?,
    );
    server.attach(&client, DEFAULT_BROADCAST_EVENTS);

    let health = spawn_health(config, "server", &upstream, &hub, &shutdown_token);
    let session_watch = spawn_session_watch(&client, &upstream, &shutdown_token);

    let addr = config.server_addr();
    let server_shutdown = shutdown_token.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(addr, server_shutdown).await {
            tracing::error!(error = %e, "Fan-out server error");
        }
    });

    tracing::info!("Bridge server ready");

    await_shutdown(shutdown_token).await;

    join_all([session_watch]).await;
    client.disconnect().await;
    join_all([server_task, health]).await;

    tracing::info!("Bridge server stopped");
    Ok(())
}

/// Relay in front of a fan-out server.
async fn run_proxy(config: &BridgeConfig, shutdown_token: CancellationToken) -> anyhow::Result<()> {
    config.require_proxy()?;
    tracing::info!("Starting Touchance bridge proxy");

    let hub = Arc::new(ConnectionHub::new(config.broadcast));
    let upstream = Arc::new(UpstreamStatus::default());

    let (relay, forwarder) = ProxyRelay::new(config.proxy()?, Arc::clone(&hub), Arc::clone(&upstream));
    let access = config
        .server
        .proxy_token
        .as_ref()
        .map(|token| AccessToken::new(token.expose()))
        .context("PROXY_TOKEN is required")?;
    let router = proxy_router(Arc::clone(&hub), forwarder, access);

    let health = spawn_health(config, "proxy", &upstream, &hub, &shutdown_token);

    let relay_shutdown = shutdown_token.clone();
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay.run(relay_shutdown).await {
            tracing::error!(error = %e, "Proxy relay gave up");
        }
    });

    let addr = config.proxy_addr();
    let serve_shutdown = shutdown_token.clone();
    let serve_task = tokio::spawn(async move {
        if let Err(e) = serve_proxy(addr, router, serve_shutdown).await {
            tracing::error!(error = %e, "Proxy server error");
        }
    });

    tracing::info!("Bridge proxy ready");

    await_shutdown(shutdown_token).await;
    join_all([relay_task, serve_task, health]).await;

    tracing::info!("Bridge proxy stopped");
    Ok(())
}

fn server_token(config: &BridgeConfig) -> anyhow::Result<AccessToken> {
    config
        .server
        .server_token
        .as_ref()
        .map(|token| AccessToken::new(token.expose()))
        .context("SERVER_TOKEN is required")
}

fn spawn_health(
    config: &BridgeConfig,
    mode: &'static str,
    upstream: &Arc<UpstreamStatus>,
    hub: &Arc<ConnectionHub>,
    shutdown_token: &CancellationToken,
) -> JoinHandle<()> {
    let state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        mode,
        Arc::clone(upstream),
        Arc::clone(hub),
    ));
    let health_server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    })
}

/// Mirror the session state into the health view and log in again
/// whenever the session is lost.
fn spawn_session_watch(
    client: &Arc<GatewayClient>,
    upstream: &Arc<UpstreamStatus>,
    shutdown_token: &CancellationToken,
) -> JoinHandle<()> {
    let client = Arc::clone(client);
    let upstream = Arc::clone(upstream);
    let cancel = shutdown_token.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if client.is_connected() {
                upstream.set_connected(true);
                continue;
            }
            if upstream.is_connected() {
                tracing::warn!("Gateway session lost, logging in again");
                upstream.set_connected(false);
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                result = client.reconnect() => match result {
                    Ok(true) => {
                        tracing::info!("Gateway session restored");
                        upstream.set_connected(true);
                    }
                    Ok(false) => tracing::warn!("Gateway rejected login, retrying"),
                    Err(e) => tracing::warn!(error = %e, "Gateway login failed, retrying"),
                },
            }
        }
        upstream.set_connected(false);
    })
}

async fn join_all<const N: usize>(tasks: [JoinHandle<()>; N]) {
    let joined = futures::future::join_all(tasks);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, joined).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with tasks still running"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
