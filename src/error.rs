//! Error types for the feed bridge
//!
//! Errors are split by how far they propagate: per-message errors are logged
//! at the loop boundary, fatal errors end the run.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Broker rejected connection with code {code}")]
    BrokerRejected { code: u8 },

    #[error("Broker disconnected unexpectedly with code {code}")]
    UnexpectedDisconnect { code: u8 },

    #[error("Unable to read inbound queue: {message}")]
    QueueRead { message: String },

    #[error("Unable to write outbound queue: {message}")]
    QueueWrite { message: String },

    #[error("Failed to translate message for publishing: {message}")]
    PublishTranslation { message: String },

    #[error("Failed to publish to feed {feed}: {message}")]
    PublishFailed { feed: String, message: String },

    #[error("Framework version {current} is below the required minimum {minimum}")]
    VersionIncompatible { current: String, minimum: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Prediction error: {message}")]
    Prediction { message: String },

    #[error("Invalid feed: {0}")]
    InvalidFeed(#[from] crate::protocol::FeedError),
}

impl BridgeError {
    pub fn queue_read<S: Into<String>>(message: S) -> Self {
        Self::QueueRead {
            message: message.into(),
        }
    }

    pub fn queue_write<S: Into<String>>(message: S) -> Self {
        Self::QueueWrite {
            message: message.into(),
        }
    }

    pub fn publish_translation<S: Into<String>>(message: S) -> Self {
        Self::PublishTranslation {
            message: message.into(),
        }
    }

    pub fn publish_failed<F: Into<String>, S: Into<String>>(feed: F, message: S) -> Self {
        Self::PublishFailed {
            feed: feed.into(),
            message: message.into(),
        }
    }

    pub fn prediction<S: Into<String>>(message: S) -> Self {
        Self::Prediction {
            message: message.into(),
        }
    }

    /// Fatal errors end the worker run; everything else is terminal only to
    /// the affected message or iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionFailed(_)
                | BridgeError::BrokerRejected { .. }
                | BridgeError::VersionIncompatible { .. }
                | BridgeError::Config(_)
        )
    }

    /// Display text with credentials and sensitive paths removed
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Remove secrets from an error message and cap its length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::BrokerRejected { code: 5 }.is_fatal());
        assert!(BridgeError::ConnectionFailed("refused".into()).is_fatal());
        assert!(BridgeError::VersionIncompatible {
            current: "2.0.0".to_string(),
            minimum: "2.1.0".to_string(),
        }
        .is_fatal());

        assert!(!BridgeError::UnexpectedDisconnect { code: 1 }.is_fatal());
        assert!(!BridgeError::queue_read("closed").is_fatal());
        assert!(!BridgeError::publish_translation("bad predictions").is_fatal());
        assert!(!BridgeError::publish_failed("age", "buffer full").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = BridgeError::VersionIncompatible {
            current: "2.0.0".to_string(),
            minimum: "2.1.0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Framework version 2.0.0 is below the required minimum 2.1.0"
        );

        let error = BridgeError::publish_failed("age", "not connected");
        assert_eq!(error.to_string(), "Failed to publish to feed age: not connected");
    }

    #[test]
    fn test_sanitized_error_hides_key() {
        let error = BridgeError::ConnectionFailed("auth failed key=aio_abc123".into());
        let sanitized = error.sanitized();
        assert!(!sanitized.contains("aio_abc123"));
        assert!(sanitized.contains("key=***"));
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "password=pass1 token: tok456 SECRET=hidden";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("tok456"));
        assert!(!sanitized.contains("hidden"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized = sanitize_error_message("cannot read /home/pi/.ssh/id_rsa");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = sanitize_error_message(&"x".repeat(500));
        assert_eq!(exact.len(), 500);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }
}
