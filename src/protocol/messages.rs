//! Queue message model
//!
//! A [`Message`] is produced by an upstream collection module, enqueued once
//! and consumed exactly once by the bridge worker.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Topic reserved for the cooperative shutdown sentinel (matched case-insensitively)
pub const SHUTDOWN_TOPIC: &str = "SHUTDOWN";

/// Structured event travelling through the sensor pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    pub topic: String,
    /// Collection point that produced the event
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Kind of collection point, e.g. `demographic_camera`
    #[serde(default)]
    pub sender_type: Option<String>,
    #[serde(default = "Utc::now")]
    pub event_time: DateTime<Utc>,
    /// Predicted attributes and other module specific data
    #[serde(default)]
    pub extended_data: Map<String, Value>,
}

impl Message {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic: topic.into(),
            sender_id: None,
            sender_type: None,
            event_time: Utc::now(),
            extended_data: Map::new(),
        }
    }

    /// Build the shutdown sentinel
    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_TOPIC)
    }

    pub fn with_sender(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.sender_id = Some(id.into());
        self.sender_type = Some(kind.into());
        self
    }

    pub fn with_extended_data(mut self, data: Map<String, Value>) -> Self {
        self.extended_data = data;
        self
    }

    /// True when this message is the shutdown control signal rather than data
    pub fn is_shutdown(&self) -> bool {
        self.topic.eq_ignore_ascii_case(SHUTDOWN_TOPIC)
    }

    /// Canonical UTF-8 JSON encoding of every message field
    pub fn stringify(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Parse a message from a JSON document
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}
