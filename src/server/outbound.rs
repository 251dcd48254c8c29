//! Outbound message queue
//!
//! Single-consumer FIFO between the message handler (producer) and the relay
//! loop (consumer). Closing the queue is an explicit signal: items already
//! queued are still delivered, later sends fail, and the consumer then sees the
//! end of the stream.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::rpc::ServerMessage;

/// Text frame reserved for heartbeats
pub const HEARTBEAT_FRAME: &str = "h";

/// An item waiting to be written to the peer
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    /// Written as the single-character text frame `"h"`
    Heartbeat,
    /// Written as a JSON text frame
    Message(ServerMessage),
}

impl From<ServerMessage> for OutboundItem {
    fn from(message: ServerMessage) -> Self {
        OutboundItem::Message(message)
    }
}

/// Returned when sending into a closed queue
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("outbound queue closed")]
pub struct QueueClosed;

/// Write side of the outbound queue.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<OutboundItem>,
    closed: CancellationToken,
}

/// Read side of the outbound queue, owned by the relay loop
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<OutboundItem>,
    closed: CancellationToken,
    draining: bool,
}

/// Create a connected sink/queue pair
pub fn outbound_queue() -> (OutboundSink, OutboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    (
        OutboundSink {
            tx,
            closed: closed.clone(),
        },
        OutboundQueue {
            rx,
            closed,
            draining: false,
        },
    )
}

impl OutboundSink {
    /// Enqueue an item for delivery
    pub fn send(&self, item: impl Into<OutboundItem>) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed);
        }
        self.tx.send(item.into()).map_err(|_| QueueClosed)
    }

    /// Close the queue.
    ///
    /// Returns `true` for the call that actually closed it; later calls are
    /// no-ops and return `false`.
    pub fn close(&self) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl OutboundQueue {
    /// Receive the next item in FIFO order.
    ///
    /// Returns `None` once the queue is closed and everything enqueued before
    /// the close has been handed out.
    pub async fn recv(&mut self) -> Option<OutboundItem> {
        if !self.draining {
            tokio::select! {
                biased;
                item = self.rx.recv() => return item,
                () = self.closed.cancelled() => {
                    self.rx.close();
                    self.draining = true;
                }
            }
        }
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (sink, mut queue) = outbound_queue();
        sink.send(ServerMessage::ok(1)).unwrap();
        sink.send(OutboundItem::Heartbeat).unwrap();
        sink.send(ServerMessage::ok(3)).unwrap();

        assert_eq!(queue.recv().await, Some(ServerMessage::ok(1).into()));
        assert_eq!(queue.recv().await, Some(OutboundItem::Heartbeat));
        assert_eq!(queue.recv().await, Some(ServerMessage::ok(3).into()));
    }

    #[tokio::test]
    async fn test_close_drains_pending_items() {
        let (sink, mut queue) = outbound_queue();
        sink.send(ServerMessage::ok(1)).unwrap();
        sink.send(ServerMessage::ok(2)).unwrap();
        assert!(sink.close());

        assert_eq!(queue.recv().await, Some(ServerMessage::ok(1).into()));
        assert_eq!(queue.recv().await, Some(ServerMessage::ok(2).into()));
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (sink, _queue) = outbound_queue();
        let producer = sink.clone();
        sink.close();

        assert!(producer.is_closed());
        assert_eq!(producer.send(OutboundItem::Heartbeat), Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (sink, _queue) = outbound_queue();
        assert!(sink.close());
        assert!(!sink.close());
        assert!(!sink.clone().close());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let (sink, mut queue) = outbound_queue();
        let receiver = tokio::spawn(async move { queue.recv().await });

        tokio::task::yield_now().await;
        sink.close();

        assert_eq!(receiver.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_queue_rejects_sends() {
        let (sink, queue) = outbound_queue();
        drop(queue);
        assert!(sink.is_closed());
        assert_eq!(sink.send(OutboundItem::Heartbeat), Err(QueueClosed));
    }
}
