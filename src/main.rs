//! WalletLink Bridge Server
//!
//! WebSocket relay for wallet link sessions. Accepts peer connections, checks
//! their origin, and relays frames between each peer and its RPC message
//! handler.

mod config;
mod rpc;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ServerConfig;
use rpc::{Collaborators, RelayHandlerFactory};
use server::WebSocketServer;

/// WalletLink Bridge Server
///
/// WebSocket relay for wallet link sessions
#[derive(Parser, Debug)]
#[command(name = "walletlink-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Allowed origin (repeatable, "*" accepts any)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Per-read deadline in seconds (0 disables)
    #[arg(long)]
    read_deadline: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Load the config file (if any) and apply command line overrides
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.allowed_origins.is_empty() {
            config = config.with_allowed_origins(self.allowed_origins.iter().cloned());
        }
        if let Some(secs) = self.read_deadline {
            config = config.with_read_deadline_secs(secs);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("WalletLink Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = args.server_config()?;
    match config.read_deadline() {
        Some(deadline) => info!("Read deadline: {:?}", deadline),
        None => info!("Read deadline disabled"),
    }

    let handlers = Arc::new(RelayHandlerFactory::new(Collaborators::in_memory()));
    let server = Arc::new(WebSocketServer::new(config, handlers));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
