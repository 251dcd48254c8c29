//! Connection session
//!
//! Owns one upgraded socket for its lifetime. The read loop runs on the
//! calling task and feeds frames to the message handler; the relay loop runs
//! on a spawned task and is the only writer. When the read loop stops for any
//! reason the session tears down in a fixed order: handler, outbound queue,
//! socket.

use std::io::ErrorKind;
use std::time::Duration;

use futures_util::{Sink, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::outbound::{outbound_queue, OutboundQueue, OutboundSink};
use super::relay::{close_socket, run_relay};
use crate::rpc::{HandlerError, HandlerFactory, MessageHandler};

/// How long teardown waits for the relay to flush and close the socket
pub const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from reading the next frame
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("connection closed by peer")]
    Closed,

    #[error("read deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("websocket read failed: {0}")]
    Transport(#[from] WsError),
}

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection, gracefully or abruptly
    PeerClosed,
    /// Unexpected read error or read deadline expiry
    ReadFailed,
    /// The message handler rejected a frame
    HandlerFailed,
    /// The relay loop closed the socket after a failed write
    WriteFailed,
    /// Server is shutting down
    Shutdown,
}

/// State for one peer connection
pub struct ConnectionSession<S> {
    ws: WebSocketStream<S>,
    handler: Box<dyn MessageHandler>,
    sink: OutboundSink,
    queue: OutboundQueue,
    read_deadline: Option<Duration>,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create the outbound queue and the connection's message handler.
    ///
    /// If the handler cannot be built the socket is closed and no loops start.
    pub async fn open(
        mut ws: WebSocketStream<S>,
        handlers: &dyn HandlerFactory,
    ) -> Result<Self, HandlerError> {
        let (sink, queue) = outbound_queue();

        match handlers.create(sink.clone()) {
            Ok(handler) => Ok(Self {
                ws,
                handler,
                sink,
                queue,
                read_deadline: None,
            }),
            Err(e) => {
                match time::timeout(RELAY_DRAIN_TIMEOUT, ws.close(None)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(close_err)) => debug!("Socket close returned: {}", close_err),
                    Err(_) => warn!("Socket close timed out after {:?}", RELAY_DRAIN_TIMEOUT),
                }
                Err(e)
            }
        }
    }

    /// Set the per-read deadline; `None` disables it
    pub fn with_read_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.read_deadline = deadline;
        self
    }

    /// Run the session until the read loop stops, then tear down.
    pub async fn run(self, shutdown: CancellationToken) -> CloseReason {
        let Self {
            ws,
            mut handler,
            sink,
            queue,
            read_deadline,
        } = self;

        let (writer, mut reader) = ws.split();
        let socket_closed = CancellationToken::new();
        let relay = tokio::spawn(run_relay(queue, writer, socket_closed.clone()));

        let reason = read_loop(
            &mut reader,
            &mut *handler,
            read_deadline,
            &socket_closed,
            &shutdown,
        )
        .await;
        debug!("Read loop stopped: {:?}", reason);

        handler.close().await;
        sink.close();
        finish_relay(relay).await;

        reason
    }
}

async fn read_loop<R>(
    reader: &mut R,
    handler: &mut dyn MessageHandler,
    read_deadline: Option<Duration>,
    socket_closed: &CancellationToken,
    shutdown: &CancellationToken,
) -> CloseReason
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = socket_closed.cancelled() => return CloseReason::WriteFailed,
            () = shutdown.cancelled() => return CloseReason::Shutdown,
            frame = read_frame(reader, read_deadline) => frame,
        };

        let payload = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            // Ping, pong and close are answered by the transport
            Ok(_) => continue,
            Err(ReadError::Closed) => return CloseReason::PeerClosed,
            Err(e) => {
                error!("{}", e);
                return CloseReason::ReadFailed;
            }
        };

        if let Err(e) = handler.handle_raw_message(&payload).await {
            warn!("Message handler failed: {}", e);
            return CloseReason::HandlerFailed;
        }
    }
}

/// Read the next frame, arming the deadline first when one is set
async fn read_frame<R>(reader: &mut R, read_deadline: Option<Duration>) -> Result<Message, ReadError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let next = match read_deadline {
        Some(deadline) => time::timeout(deadline, reader.next())
            .await
            .map_err(|_| ReadError::DeadlineExceeded(deadline))?,
        None => reader.next().await,
    };

    match next {
        Some(Ok(message)) => Ok(message),
        Some(Err(e)) if is_close_error(&e) => Err(ReadError::Closed),
        Some(Err(e)) => Err(e.into()),
        None => Err(ReadError::Closed),
    }
}

/// Whether a transport error just means the peer went away
pub fn is_close_error(err: &WsError) -> bool {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

/// Wait for the relay to drain the closed queue, then close the socket.
///
/// A relay stuck on a stalled peer is aborted, which drops the write half.
async fn finish_relay<W>(mut relay: JoinHandle<W>)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let drained = time::timeout(RELAY_DRAIN_TIMEOUT, async {
        match (&mut relay).await {
            Ok(mut writer) => close_socket(&mut writer).await,
            Err(e) => error!("Relay task failed: {}", e),
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Relay did not finish within {:?}, dropping socket",
            RELAY_DRAIN_TIMEOUT
        );
        relay.abort();
    }
}
