//! Configuration system for the feed bridge
//!
//! The configuration is loaded once from a TOML file and treated as an
//! immutable snapshot for the lifetime of the worker. Secrets are never stored
//! in the file; the file names the environment variable that holds them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::feeds::validate_feed_name;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub bridge: BridgeSection,
    pub mqtt: MqttSection,
    pub publish: PublishSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub worker: WorkerSection,
    pub health: Option<HealthSection>,
    pub prediction: Option<PredictionSection>,
}

/// Compatibility information for the hosting sensor framework
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Version of the framework this worker runs inside
    pub framework_version: String,
    /// Minimum framework version this module supports
    pub min_framework_version: String,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Broker username, also used as the feed account name
    pub username: String,
    /// Environment variable containing the broker key
    pub key_env: Option<String>,
    /// Explicit client id (generated when omitted)
    pub client_id: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Capacity of the outgoing request buffer
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_request_capacity() -> usize {
    64
}

/// Publish behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    pub mode: PublishMode,
    /// Feed used whenever a call site does not name one
    pub default_feed: String,
    #[serde(default)]
    pub on_disconnected: UndeliverablePolicy,
    #[serde(default = "default_requeue_capacity")]
    pub requeue_capacity: usize,
}

fn default_requeue_capacity() -> usize {
    256
}

/// How a message is translated into broker publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// One publish of the whole message as JSON to the default feed
    RawJson,
    /// One publish per face attribute, attribute name as feed
    FlattenedFaceAttributes,
    /// One publish per top-level extended data entry
    GenericValues,
}

/// What happens to a message dequeued while the broker link is down
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UndeliverablePolicy {
    #[default]
    Drop,
    Requeue,
    DeadLetter,
}

/// Reconnect policy selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default)]
    pub policy: ReconnectPolicyKind,
    /// Maximum attempts per outage (None = unlimited)
    pub max_attempts: Option<u32>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicyKind {
    #[default]
    Manual,
    Backoff,
}

fn default_backoff_ms() -> Vec<u64> {
    vec![500, 1000, 2000, 5000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicyKind::Manual,
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

/// Loop timing for the queue drain worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    #[serde(default = "default_pump_timeout_ms")]
    pub pump_timeout_ms: u64,
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_pump_timeout_ms() -> u64 {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_idle_sleep_ms() -> u64 {
    250
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            pump_timeout_ms: default_pump_timeout_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl WorkerSection {
    pub fn pump_timeout(&self) -> Duration {
        Duration::from_millis(self.pump_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    pub port: u16,
}

/// Image prediction service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionSection {
    /// Regional endpoint host, e.g. `westus.api.cognitive.microsoft.com`
    pub uri_base: String,
    /// Environment variable containing the subscription key
    pub subscription_key_env: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid feed name: {0}")]
    InvalidFeed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keep_alive_secs must be at least 5, got {}",
                self.mqtt.keep_alive_secs
            )));
        }
        if self.mqtt.username.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.username must not be empty".to_string(),
            ));
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.request_capacity must be greater than 0".to_string(),
            ));
        }

        validate_feed_name(&self.publish.default_feed)
            .map_err(|e| ConfigError::InvalidFeed(e.to_string()))?;

        if self.publish.on_disconnected == UndeliverablePolicy::Requeue
            && self.publish.requeue_capacity == 0
        {
            return Err(ConfigError::InvalidConfig(
                "publish.requeue_capacity must be greater than 0 for the requeue policy"
                    .to_string(),
            ));
        }

        if self.reconnect.policy == ReconnectPolicyKind::Backoff {
            if self.reconnect.max_attempts == Some(0) {
                return Err(ConfigError::InvalidConfig(
                    "reconnect.max_attempts must be greater than 0 or omitted for unlimited"
                        .to_string(),
                ));
            }
            if self.reconnect.backoff_ms.is_empty() && self.reconnect.sustained_delay_ms == 0 {
                return Err(ConfigError::InvalidConfig(
                    "reconnect needs a backoff pattern or a sustained delay".to_string(),
                ));
            }
        }

        if self.worker.pump_timeout_ms == 0 || self.worker.dequeue_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Broker key from the configured environment variable
    pub fn get_mqtt_key(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.key_env.as_ref())
    }

    /// Prediction subscription key, if a prediction section is configured
    pub fn get_prediction_key(&self) -> Result<String, ConfigError> {
        let section = self.prediction.as_ref().ok_or_else(|| {
            ConfigError::InvalidConfig("no [prediction] section configured".to_string())
        })?;
        Self::get_env_var_required(&section.subscription_key_env)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[bridge]
framework_version = "2.1.0"
min_framework_version = "2.0.0"

[mqtt]
host = "localhost"
port = 1883
keep_alive_secs = 60
username = "test-account"

[publish]
mode = "raw_json"
default_feed = "sensor"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
