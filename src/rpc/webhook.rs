//! Webhook dispatch
//!
//! Notifies an external party when events are published.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Receives a notification for each published event
#[async_trait]
pub trait Webhook: Send + Sync {
    async fn notify(&self, topic: &str, data: &Value);
}

/// Webhook that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWebhook;

#[async_trait]
impl Webhook for LogWebhook {
    async fn notify(&self, topic: &str, data: &Value) {
        debug!("Webhook notify: topic={}, payload_len={}", topic, data.to_string().len());
    }
}
