//! RPC message definitions
//!
//! JSON messages exchanged between link peers and the default relay handler.
//! Every message carries a `type` tag; requests carry a client-chosen `id`
//! that is echoed in the matching response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum topic name length
pub const MAX_TOPIC_LENGTH: usize = 256;

// ============================================================================
// Client Messages
// ============================================================================

/// Requests sent from a peer to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Receive every event later published on a topic
    Subscribe {
        /// Request identifier
        id: u64,
        /// Topic to follow
        topic: String,
    },

    /// Publish an event to every subscriber of a topic
    Publish {
        /// Request identifier
        id: u64,
        /// Destination topic
        topic: String,
        /// Opaque event payload
        data: Value,
    },

    /// Fetch the most recent event published on a topic
    GetLast {
        /// Request identifier
        id: u64,
        /// Topic to look up
        topic: String,
    },
}

impl ClientMessage {
    /// Request identifier
    pub fn id(&self) -> u64 {
        match self {
            ClientMessage::Subscribe { id, .. }
            | ClientMessage::Publish { id, .. }
            | ClientMessage::GetLast { id, .. } => *id,
        }
    }

    /// Validate message contents, returning a description of the problem
    pub fn validate(&self) -> Result<(), String> {
        let topic = match self {
            ClientMessage::Subscribe { topic, .. }
            | ClientMessage::Publish { topic, .. }
            | ClientMessage::GetLast { topic, .. } => topic,
        };

        if topic.is_empty() {
            return Err("topic cannot be empty".to_string());
        }
        if topic.len() > MAX_TOPIC_LENGTH {
            return Err(format!(
                "topic exceeds maximum length of {} characters",
                MAX_TOPIC_LENGTH
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from the server to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Request succeeded
    Ok {
        /// Identifier of the request
        id: u64,
    },

    /// An event published on a subscribed topic
    Event {
        /// Source topic
        topic: String,
        /// Event payload as published
        data: Value,
    },

    /// Response to `get_last`
    Last {
        /// Identifier of the request
        id: u64,
        /// Topic that was looked up
        topic: String,
        /// Most recent event, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Request failed
    Fail {
        /// Identifier of the request
        id: u64,
        /// Error description
        error: String,
    },
}

impl ServerMessage {
    /// Create an Ok message
    pub fn ok(id: u64) -> Self {
        ServerMessage::Ok { id }
    }

    /// Create an Event message
    pub fn event(topic: impl Into<String>, data: Value) -> Self {
        ServerMessage::Event {
            topic: topic.into(),
            data,
        }
    }

    /// Create a Fail message
    pub fn fail(id: u64, error: impl Into<String>) -> Self {
        ServerMessage::Fail {
            id,
            error: error.into(),
        }
    }
}
