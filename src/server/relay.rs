//! Outbound relay loop
//!
//! Drains the outbound queue and writes each item to the peer. The relay is
//! the only writer on a connection's socket.

use futures_util::{Sink, SinkExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outbound::{OutboundItem, OutboundQueue, HEARTBEAT_FRAME};
use crate::rpc::ServerMessage;

/// Errors that end the relay loop
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("websocket write failed: {0}")]
    Write(#[from] WsError),
}

/// Run the relay loop until the queue closes or a write fails.
///
/// On a failed message write the socket is closed and `socket_closed` is
/// cancelled so the read loop stops waiting on the peer. The write half is
/// handed back for final teardown either way.
pub async fn run_relay<W>(mut queue: OutboundQueue, mut writer: W, socket_closed: CancellationToken) -> W
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(item) = queue.recv().await {
        match item {
            OutboundItem::Heartbeat => {
                if let Err(e) = writer.send(Message::Text(HEARTBEAT_FRAME.to_string())).await {
                    debug!("Heartbeat write failed: {}", e);
                }
            }
            OutboundItem::Message(message) => {
                if let Err(e) = write_message(&mut writer, &message).await {
                    warn!("{}", e);
                    close_socket(&mut writer).await;
                    socket_closed.cancel();
                    break;
                }
            }
        }
    }

    writer
}

/// Encode a message as JSON and write it as a text frame
async fn write_message<W>(writer: &mut W, message: &ServerMessage) -> Result<(), RelayError>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.send(Message::Text(json)).await?;
    Ok(())
}

/// Close the write half, tolerating a socket that is already closed
pub async fn close_socket<W>(writer: &mut W)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    match writer.close().await {
        Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {}
        Err(e) => debug!("Socket close returned: {}", e),
    }
}
