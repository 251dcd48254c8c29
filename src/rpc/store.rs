//! Session store
//!
//! Keeps the most recent event per topic so late joiners can catch up.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors reported by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[allow(dead_code)]
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent storage used by message handlers
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record the latest event for a topic
    async fn save_last(&self, topic: &str, data: Value) -> Result<(), StoreError>;

    /// Latest event for a topic, if one was recorded
    async fn load_last(&self, topic: &str) -> Result<Option<Value>, StoreError>;
}

/// In-process store backed by a map
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_last(&self, topic: &str, data: Value) -> Result<(), StoreError> {
        self.events.write().await.insert(topic.to_string(), data);
        Ok(())
    }

    async fn load_last(&self, topic: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.events.read().await.get(topic).cloned())
    }
}
