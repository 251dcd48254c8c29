//! WebSocket server implementation
//!
//! Listens for TCP connections, upgrades each one, and runs a connection
//! session per peer until it closes or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::origin::AllowedOrigins;
use super::session::ConnectionSession;
use super::upgrade::upgrade;
use crate::config::ServerConfig;
use crate::rpc::HandlerFactory;

/// WebSocket server for link peers
pub struct WebSocketServer {
    config: ServerConfig,
    origins: Arc<AllowedOrigins>,
    handlers: Arc<dyn HandlerFactory>,
    shutdown: CancellationToken,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, handlers: Arc<dyn HandlerFactory>) -> Self {
        let origins = Arc::new(AllowedOrigins::new(config.allowed_origins.iter().cloned()));
        Self {
            config,
            origins,
            handlers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("WebSocket server listening on ws://{}", addr);

        self.serve(listener).await
    }

    /// Accept connections from `listener` until shutdown.
    ///
    /// Each connection runs on its own task; a failing connection never
    /// affects the others.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        if self.origins.is_empty() {
            info!("No allowed origins configured, accepting any origin");
        }
        let read_deadline = self.config.read_deadline();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let origins = Arc::clone(&self.origins);
                            let handlers = Arc::clone(&self.handlers);
                            let shutdown = self.shutdown.child_token();
                            let span = info_span!("conn", id = %Uuid::new_v4());

                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_connection(stream, peer_addr, origins, handlers, read_deadline, shutdown).await {
                                        error!("Connection error from {}: {:#}", peer_addr, e);
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Upgrade a single connection and run its session
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    origins: Arc<AllowedOrigins>,
    handlers: Arc<dyn HandlerFactory>,
    read_deadline: Option<Duration>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (ws, peer) = upgrade(stream, peer_addr, |origin| origins.is_allowed(origin))
        .await
        .context("websocket upgrade failed")?;

    info!(
        "Opened ws with IP: {}, {} User-Agent: {}",
        peer.client_ip, peer.remote_addr, peer.user_agent
    );

    let session = ConnectionSession::open(ws, handlers.as_ref())
        .await
        .context("message handler creation failed")?;
    let reason = session.with_read_deadline(read_deadline).run(shutdown).await;

    info!(
        "Closed ws with IP: {}, {} User-Agent: {} ({:?})",
        peer.client_ip, peer.remote_addr, peer.user_agent, reason
    );
    Ok(())
}
