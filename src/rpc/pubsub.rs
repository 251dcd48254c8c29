//! In-process topic fan-out
//!
//! Each topic maps to a broadcast channel. Subscribers get a receiver and see
//! every event published after they subscribed.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default per-topic buffer before slow subscribers start lagging
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Publish/subscribe bus shared by all connections
#[derive(Debug)]
pub struct PubSub {
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl PubSub {
    /// Create a bus with the given per-topic buffer size
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a topic
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop a topic once nobody is listening on it
    pub async fn unsubscribe(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            debug!("Dropping topic {} with no subscribers", topic);
            topics.remove(topic);
        }
    }

    /// Publish an event, returning how many subscribers received it.
    ///
    /// Topics with no remaining subscribers are dropped.
    pub async fn publish(&self, topic: &str, data: Value) -> usize {
        let mut topics = self.topics.write().await;
        let Some(tx) = topics.get(topic) else {
            return 0;
        };

        match tx.send(data) {
            Ok(count) => count,
            Err(_) => {
                debug!("Dropping topic {} with no subscribers", topic);
                topics.remove(topic);
                0
            }
        }
    }

    /// Number of topics currently tracked
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}
