//! Feed bridge
//!
//! A worker that drains messages from a sensor pipeline's inbound queue and
//! republishes them onto MQTT feeds (`{account}/feeds/{feed}`), owning the
//! broker connection lifecycle and a cooperative shutdown protocol.
//!
//! # Overview
//!
//! - [`bridge`] - The queue drain worker, connection state machine and publish strategies
//! - [`transport`] - The broker link abstraction and its MQTT implementation
//! - [`protocol`] - Queue messages and feed naming
//! - [`prediction`] - The image prediction collaborator feeding face attributes
//! - [`config`], [`error`], [`observability`] - Configuration, errors, logging and metrics
//!
//! # Quick Start
//!
//! ```rust
//! use feedbridge::bridge::{FlattenedFaceAttributes, PublishStrategy};
//! use feedbridge::protocol::Message;
//! use serde_json::json;
//!
//! let data = json!({"predictions": [{"faceAttributes": {"age": 30, "gender": "male"}}]});
//! let message = Message::new("face-detected")
//!     .with_extended_data(data.as_object().cloned().unwrap_or_default());
//!
//! let translation = FlattenedFaceAttributes.translate(&message, "demographics");
//! let feeds: Vec<&str> = translation.calls.iter().map(|c| c.feed.as_str()).collect();
//! assert_eq!(feeds, ["age", "gender"]);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod prediction;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{QueueDrainWorker, RunOutcome, WorkerStats};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::{mqtt::MqttClient, BrokerLink, LinkEvent};
