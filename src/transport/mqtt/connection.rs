//! Pure connection state management for the MQTT link
//!
//! This module contains the connection state type, the reconnect backoff
//! configuration and the construction of broker options from configuration.

use crate::config::{MqttSection, ReconnectSection};
use crate::protocol::FeedError;
use rumqttc::{ConnectReturnCode, MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;

/// Connection state of the broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, and the state after any broker reported disconnect
    Disconnected,
    /// Transient state while a connect is in progress
    Connecting,
    /// Broker acknowledged the connection with code 0
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Reconnection backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts per outage (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, one entry per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Maximum total delay across all attempts, None for unlimited retries
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Backoff delay in milliseconds for a 1-based attempt number
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Invalid feed: {0}")]
    InvalidFeed(#[from] FeedError),
}

/// Numeric code for a CONNACK return code, 0 meaning accepted
pub fn connack_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Client id used when the configuration does not name one
pub fn default_client_id(username: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("feedbridge-{username}-{timestamp}")
}

/// Build broker options from configuration and the resolved broker key
pub fn configure_mqtt_options(
    config: &MqttSection,
    key: Option<&str>,
) -> Result<MqttOptions, MqttError> {
    if config.host.trim().is_empty() {
        return Err(MqttError::InvalidConfig("broker host is empty".to_string()));
    }
    if config.keep_alive_secs < 5 {
        return Err(MqttError::InvalidConfig(format!(
            "keep alive must be at least 5 seconds, got {}",
            config.keep_alive_secs
        )));
    }

    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| default_client_id(&config.username));
    let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(config.username.clone(), key.unwrap_or_default());
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}
