//! Transport layer for the broker link
//!
//! This module provides the [`BrokerLink`] abstraction over the broker
//! connection and its MQTT implementation. Broker events are not delivered
//! through callbacks: the link buffers them while it is pumped and the caller
//! drains them in arrival order with [`BrokerLink::take_events`], on the same
//! task that pumps.

use bytes::Bytes;
use std::time::Duration;

pub mod mqtt;

/// Event reported by the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connect acknowledgment; code 0 is success
    ConnAck { code: u8 },
    /// Connection ended; code 0 is a requested disconnect
    Disconnected { code: u8, reason: String },
    /// Broker delivered a message on a subscribed feed
    Message { topic: String, payload: Bytes },
}

/// Connection to the publish/subscribe broker
///
/// Feed names passed to the link are already resolved (never empty); the link
/// turns them into broker topics.
#[async_trait::async_trait]
pub trait BrokerLink: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the transport; a no-op when already connected
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the transport; a no-op when not connected
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Send a payload to a feed
    async fn publish(&mut self, feed: &str, payload: Bytes) -> Result<(), Self::Error>;

    /// Subscribe to a feed
    async fn subscribe(&mut self, feed: &str) -> Result<(), Self::Error>;

    /// Service at most one unit of pending network I/O, waiting no longer than `timeout`
    async fn pump(&mut self, timeout: Duration) -> Result<(), Self::Error>;

    /// Drain events observed since the last call, oldest first
    fn take_events(&mut self) -> Vec<LinkEvent>;

    /// True while the transport is open
    fn is_connected(&self) -> bool;
}

/// Type alias for the MQTT broker link
pub type MqttLink = mqtt::MqttClient;
