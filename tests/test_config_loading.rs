//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use feedbridge::config::{
    BridgeConfig, ConfigError, PublishMode, ReconnectPolicyKind, UndeliverablePolicy,
};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

const MINIMAL: &str = r#"
[bridge]
framework_version = "2.1.0"
min_framework_version = "2.0.0"

[mqtt]
host = "io.adafruit.com"
username = "lab-account"

[publish]
mode = "raw_json"
default_feed = "sensor"
"#;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(MINIMAL);

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.bridge.framework_version, "2.1.0");
    assert_eq!(config.mqtt.host, "io.adafruit.com");
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.mqtt.username, "lab-account");
    assert_eq!(config.publish.mode, PublishMode::RawJson);
    assert_eq!(config.publish.default_feed, "sensor");
    assert_eq!(config.publish.on_disconnected, UndeliverablePolicy::Drop);
    assert_eq!(config.reconnect.policy, ReconnectPolicyKind::Manual);
    assert!(config.health.is_none());
}

#[test]
fn test_config_loads_with_optional_sections() {
    let temp_file = write_config(
        r#"
[bridge]
framework_version = "2.1.0"
min_framework_version = "2.0.0"

[mqtt]
host = "io.adafruit.com"
port = 8883
tls = true
username = "lab-account"
key_env = "FEEDBRIDGE_IT_KEY"

[publish]
mode = "generic_values"
default_feed = "climate"
on_disconnected = "dead_letter"

[reconnect]
policy = "backoff"
max_attempts = 5

[worker]
shutdown_grace_ms = 250

[health]
port = 8080

[prediction]
uri_base = "westus.api.cognitive.microsoft.com"
subscription_key_env = "FEEDBRIDGE_IT_FACE_KEY"
"#,
    );

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();

    assert!(config.mqtt.tls);
    assert_eq!(config.publish.mode, PublishMode::GenericValues);
    assert_eq!(config.publish.on_disconnected, UndeliverablePolicy::DeadLetter);
    assert_eq!(config.reconnect.max_attempts, Some(5));
    assert_eq!(config.reconnect.backoff_ms, vec![500, 1000, 2000, 5000]);
    assert_eq!(config.worker.shutdown_grace(), Duration::from_millis(250));
    assert_eq!(config.health.unwrap().port, 8080);
    assert_eq!(
        config.prediction.unwrap().uri_base,
        "westus.api.cognitive.microsoft.com"
    );
}

#[test]
fn test_missing_file_reports_read_error() {
    let result = BridgeConfig::load_from_file(std::path::Path::new("/nonexistent/feedbridge.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let temp_file = write_config("[bridge\nframework_version = ");
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_publish_mode_is_rejected() {
    let temp_file = write_config(&MINIMAL.replace("raw_json", "everything"));
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_default_feed_is_rejected() {
    let temp_file = write_config(&MINIMAL.replace(r#"default_feed = "sensor""#, r#"default_feed = "a/b""#));
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidFeed(_))));
}

#[test]
fn test_empty_username_is_rejected() {
    let temp_file = write_config(&MINIMAL.replace("lab-account", " "));
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_zero_reconnect_attempts_is_rejected() {
    let content = format!("{MINIMAL}\n[reconnect]\npolicy = \"backoff\"\nmax_attempts = 0\n");
    let temp_file = write_config(&content);
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_broker_key_comes_from_environment() {
    let content = MINIMAL.replace(
        r#"username = "lab-account""#,
        "username = \"lab-account\"\nkey_env = \"FEEDBRIDGE_IT_BROKER_KEY\"",
    );
    let config = BridgeConfig::from_toml_str(&content).unwrap();

    std::env::remove_var("FEEDBRIDGE_IT_BROKER_KEY");
    assert!(config.get_mqtt_key().is_none());

    std::env::set_var("FEEDBRIDGE_IT_BROKER_KEY", "aio_secret");
    assert_eq!(config.get_mqtt_key().as_deref(), Some("aio_secret"));
    std::env::remove_var("FEEDBRIDGE_IT_BROKER_KEY");
}

#[test]
fn test_prediction_key_requires_section_and_variable() {
    let config = BridgeConfig::from_toml_str(MINIMAL).unwrap();
    assert!(matches!(
        config.get_prediction_key(),
        Err(ConfigError::InvalidConfig(_))
    ));

    let content = format!(
        "{MINIMAL}\n[prediction]\nuri_base = \"westus.api.cognitive.microsoft.com\"\nsubscription_key_env = \"FEEDBRIDGE_IT_MISSING_KEY\"\n"
    );
    let config = BridgeConfig::from_toml_str(&content).unwrap();
    std::env::remove_var("FEEDBRIDGE_IT_MISSING_KEY");
    assert!(matches!(
        config.get_prediction_key(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "FEEDBRIDGE_IT_MISSING_KEY"
    ));
}
