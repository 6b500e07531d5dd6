//! playsync-server - standalone headless server for the playsync realtime
//! synchronized playback service.
//!
//! This binary hosts the HTTP/WebSocket surface exposed by `playsync-core`.
//! It owns everything the core deliberately stays out of: loading and
//! merging configuration, wiring the external auth/persistence
//! collaborators, and the process-level signal handling around startup and
//! graceful shutdown.

mod auth;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use playsync_core::{AppState, InMemoryPersistence, NoopAuthProvider};
use tokio::signal;

use crate::auth::JwtAuthProvider;
use crate::config::ServerConfig;

/// playsync-server - headless realtime synchronized playback server.
#[derive(Parser, Debug)]
#[command(name = "playsync-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind host (overrides config file / environment).
    #[arg(long, env = "BIND_HOST")]
    bind_host: Option<std::net::IpAddr>,

    /// Bind port (overrides config file / environment).
    #[arg(short = 'p', long, env = "BIND_PORT")]
    port: Option<u16>,

    /// Data directory for per-room scratch state.
    #[arg(short = 'd', long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared secret used to verify bearer credentials. Omit to run without
    /// authentication (every connection is rejected at the admission layer)
    /// — useful for local development behind a trusted proxy only.
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("playsync-server v{}", env!("CARGO_PKG_VERSION"));

    let mut server_config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(host) = args.bind_host {
        server_config.bind_host = Some(host);
    }
    if let Some(port) = args.port {
        server_config.bind_port = Some(port);
    }
    if let Some(data_dir) = args.data_dir.clone() {
        server_config.data_dir = Some(data_dir);
    }
    if let Some(secret) = args.jwt_secret.clone() {
        server_config.jwt_secret = Some(secret);
    }

    let core_config = Arc::new(server_config.to_core_config());
    core_config.validate().context("invalid configuration")?;
    log::info!(
        "configuration: bind_addr={}, max_rooms={}, max_clients_per_room={}",
        core_config.bind_addr,
        core_config.max_rooms,
        core_config.max_clients_per_room,
    );

    std::fs::create_dir_all(&core_config.data_dir)
        .with_context(|| format!("failed to create data directory {}", core_config.data_dir.display()))?;

    let services = playsync_core::bootstrap_services(Arc::clone(&core_config));
    services.spawn_background_tasks();
    log::info!("background tasks started");

    let auth: Arc<dyn playsync_core::AuthProvider> = match &server_config.jwt_secret {
        Some(secret) => Arc::new(JwtAuthProvider::new(secret)),
        None => {
            log::warn!("no JWT_SECRET configured - every connection will be rejected at admission");
            Arc::new(NoopAuthProvider)
        }
    };
    let persistence: Arc<dyn playsync_core::PersistenceProvider> = Arc::new(InMemoryPersistence::new());

    let app_state = AppState::builder()
        .manager(Arc::clone(&services.manager))
        .config(Arc::clone(&services.config))
        .auth(auth)
        .persistence(persistence)
        .join_limiter(Arc::clone(&services.join_limiter))
        .cancel_token(services.cancel_token.clone())
        .build();

    let server_handle = tokio::spawn(async move {
        if let Err(err) = playsync_core::start_server(app_state).await {
            log::error!("server error: {err}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    let _ = server_handle.await;

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
