//! Environ agent entry point.
//!
//! Initialises tracing, loads configuration from `ENVIRON_*` environment
//! variables, opens the managed env file, connects to Valkey and serves
//! `env.*` events until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use tracing_subscriber::EnvFilter;

use environ_agent::bus::ValkeyBus;
use environ_agent::{ConfigStore, Dispatcher, ExecPolicy, NodeIdentity, Shell, ShellRunner};
use environ_common::{AgentConfig, ENV_PREFIX};

// ===================================================================
// Health endpoint
// ===================================================================

/// Minimal health-check handler for Docker / load-balancer probes.
async fn health() -> StatusCode {
    StatusCode::OK
}

async fn serve_health(addr: SocketAddr) -> Result<()> {
    let router = axum::Router::new().route("/health", axum::routing::get(health));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health listener on {addr}"))?;
    tracing::info!(%addr, "health endpoint ready");
    axum::serve(listener, router)
        .await
        .context("health server error")
}

// ===================================================================
// Entry point
// ===================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialise tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing::info!("environ-agent starting");

    // 2. Load configuration from ENVIRON_* env vars.
    let config: AgentConfig = envy::prefixed(ENV_PREFIX).from_env().context(
        "failed to load config from ENVIRON_* env vars \
         (ENVIRON_MASTER_NAME and ENVIRON_MINION_ENV are required)",
    )?;
    config.validate()?;

    let password = match &config.valkey_pass_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read password from {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    let hostname = hostname::get()
        .context("failed to read hostname")?
        .to_string_lossy()
        .into_owned();

    tracing::info!(
        master = %config.master_name,
        node = %config.node_name(),
        env_file = %config.minion_env.display(),
        valkey_url = %config.cortex_redis,
        exec_enabled = config.exec_enabled,
        "configuration loaded",
    );

    // 3. Open the env file. It must exist; the agent never creates it.
    let store = ConfigStore::open(&config.minion_env)
        .await
        .with_context(|| format!("cannot manage {}", config.minion_env.display()))?;

    let shell = Shell::new(
        ShellRunner::new(config.exec_timeout_secs.map(Duration::from_secs)),
        ExecPolicy::from_config(&config),
    );
    let node = NodeIdentity {
        hostname,
        node_name: config.node_name(),
        node_type: config.minion_type.clone(),
    };
    let dispatcher = Arc::new(Dispatcher::new(store, shell, node));

    // 4. Connect to Valkey and verify connectivity via PING.
    let bus = ValkeyBus::connect(&config, password)
        .await
        .context("failed to initialise Valkey connection")?;

    if let Some(addr) = config.health_addr {
        tokio::spawn(async move {
            if let Err(e) = serve_health(addr).await {
                tracing::error!(error = %e, "health endpoint stopped");
            }
        });
    }

    // 5. Serve until the stream dies or a shutdown signal arrives.
    let outcome = tokio::select! {
        result = bus.run(Arc::clone(&dispatcher)) => result,
        () = shutdown_signal() => Ok(()),
    };

    bus.shutdown().await;
    tracing::info!("environ-agent shut down");
    outcome
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("received shutdown signal");
}
