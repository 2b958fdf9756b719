//! MQTT broker link
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, reconnect backoff and option construction
//! - [`message_handler`] - Pure routing of event loop output
//! - [`client`] - Impure I/O, the [`BrokerLink`](crate::transport::BrokerLink) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use feedbridge::config::MqttSection;
//! use feedbridge::transport::{mqtt::MqttClient, BrokerLink};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     keep_alive_secs: 60,
//!     username: "lab-account".to_string(),
//!     key_env: None,
//!     client_id: None,
//!     tls: false,
//!     request_capacity: 64,
//! };
//!
//! let mut link = MqttClient::new(&config, None)?;
//! link.connect().await?;
//! link.publish("temperature", "21.5".into()).await?;
//! link.pump(Duration::from_secs(1)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler};
