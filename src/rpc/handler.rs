//! Message handler boundary
//!
//! The connection layer creates one [`MessageHandler`] per socket through a
//! [`HandlerFactory`], feeds it every text/binary payload, and closes it once
//! the socket stops reading. Handlers answer by pushing items into the
//! [`OutboundSink`] they were built with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{ClientMessage, ServerMessage};
use super::pubsub::PubSub;
use super::store::{MemoryStore, SessionStore, StoreError};
use super::webhook::{LogWebhook, Webhook};
use crate::server::{OutboundItem, OutboundSink, QueueClosed, HEARTBEAT_FRAME};

/// Errors returned by message handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("handler is closed")]
    Closed,

    #[error("outbound queue closed")]
    QueueClosed(#[from] QueueClosed),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Per-connection RPC processor
#[async_trait]
pub trait MessageHandler: Send {
    /// Process one inbound frame payload.
    ///
    /// An error is fatal to the connection.
    async fn handle_raw_message(&mut self, data: &[u8]) -> HandlerResult<()>;

    /// Release per-connection state. Called once, after reading has stopped.
    async fn close(&mut self);
}

/// Builds a handler for each accepted connection
pub trait HandlerFactory: Send + Sync {
    fn create(&self, sink: OutboundSink) -> HandlerResult<Box<dyn MessageHandler>>;
}

/// Process-wide collaborators shared by every handler
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub pubsub: Arc<PubSub>,
    pub webhook: Arc<dyn Webhook>,
}

impl Collaborators {
    /// Collaborators that keep everything in process memory
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            pubsub: Arc::new(PubSub::default()),
            webhook: Arc::new(LogWebhook),
        }
    }
}

/// Factory for [`RelayHandler`]
#[derive(Clone)]
pub struct RelayHandlerFactory {
    collaborators: Collaborators,
}

impl RelayHandlerFactory {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl HandlerFactory for RelayHandlerFactory {
    fn create(&self, sink: OutboundSink) -> HandlerResult<Box<dyn MessageHandler>> {
        let Collaborators {
            store,
            pubsub,
            webhook,
        } = self.collaborators.clone();
        Ok(Box::new(RelayHandler::new(sink, store, pubsub, webhook)?))
    }
}

/// Default handler: heartbeat echo plus topic subscribe/publish
pub struct RelayHandler {
    sink: OutboundSink,
    store: Arc<dyn SessionStore>,
    pubsub: Arc<PubSub>,
    webhook: Arc<dyn Webhook>,
    subscriptions: HashMap<String, JoinHandle<()>>,
    closed: bool,
}

impl RelayHandler {
    /// Create a handler writing to `sink`
    pub fn new(
        sink: OutboundSink,
        store: Arc<dyn SessionStore>,
        pubsub: Arc<PubSub>,
        webhook: Arc<dyn Webhook>,
    ) -> HandlerResult<Self> {
        if sink.is_closed() {
            return Err(HandlerError::Unavailable(
                "outbound queue already closed".to_string(),
            ));
        }

        Ok(Self {
            sink,
            store,
            pubsub,
            webhook,
            subscriptions: HashMap::new(),
            closed: false,
        })
    }

    /// Number of topics this connection follows
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    async fn handle_message(&mut self, message: ClientMessage) -> HandlerResult<()> {
        let id = message.id();
        if let Err(reason) = message.validate() {
            self.sink.send(ServerMessage::fail(id, reason))?;
            return Ok(());
        }

        let response = match message {
            ClientMessage::Subscribe { id, topic } => {
                self.subscribe(topic).await;
                ServerMessage::ok(id)
            }
            ClientMessage::Publish { id, topic, data } => {
                self.store.save_last(&topic, data.clone()).await?;
                self.webhook.notify(&topic, &data).await;
                let delivered = self.pubsub.publish(&topic, data).await;
                debug!("Published to {} ({} subscribers)", topic, delivered);
                ServerMessage::ok(id)
            }
            ClientMessage::GetLast { id, topic } => {
                let data = self.store.load_last(&topic).await?;
                ServerMessage::Last { id, topic, data }
            }
        };

        self.sink.send(response)?;
        Ok(())
    }

    /// Forward events on `topic` to this connection until closed
    async fn subscribe(&mut self, topic: String) {
        if self.subscriptions.contains_key(&topic) {
            return;
        }

        let mut events = self.pubsub.subscribe(&topic).await;
        let sink = self.sink.clone();
        let forward_topic = topic.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(data) => {
                        if sink.send(ServerMessage::event(forward_topic.as_str(), data)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, skipped {} events", forward_topic, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        debug!(
            "Subscribed to {} ({} topics active)",
            topic,
            self.pubsub.topic_count().await
        );
        self.subscriptions.insert(topic, forwarder);
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle_raw_message(&mut self, data: &[u8]) -> HandlerResult<()> {
        if self.closed {
            return Err(HandlerError::Closed);
        }

        if data == HEARTBEAT_FRAME.as_bytes() {
            self.sink.send(OutboundItem::Heartbeat)?;
            return Ok(());
        }

        let message: ClientMessage = serde_json::from_slice(data)?;
        self.handle_message(message).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("Closing handler with {} subscriptions", self.subscription_count());

        for (topic, forwarder) in std::mem::take(&mut self.subscriptions) {
            debug!("Unsubscribing from {}", topic);
            forwarder.abort();
            // The receiver is released once the aborted task is dropped
            let _ = forwarder.await;
            self.pubsub.unsubscribe(&topic).await;
        }
    }
}
