//! Integration tests for the MQTT broker link
//!
//! Tests the link without a running broker:
//! - Construction and option validation
//! - Publish and subscribe refused while disconnected
//! - Startup against an unreachable broker ends the worker run

use bytes::Bytes;
use feedbridge::bridge::QueueDrainWorker;
use feedbridge::config::{MqttSection, PublishMode};
use feedbridge::error::BridgeError;
use feedbridge::protocol::Message;
use feedbridge::testing::ScriptedQueue;
use feedbridge::transport::mqtt::{MqttClient, MqttError};
use feedbridge::transport::BrokerLink;
use std::time::Duration;
use tokio::time::timeout;

mod test_helpers;
use test_helpers::test_config;

fn unreachable_broker() -> MqttSection {
    MqttSection {
        host: "127.0.0.1".to_string(),
        // Nothing listens on the tcpmux port
        port: 1,
        keep_alive_secs: 60,
        username: "lab-account".to_string(),
        key_env: None,
        client_id: Some("feedbridge-test".to_string()),
        tls: false,
        request_capacity: 8,
    }
}

#[tokio::test]
async fn test_link_starts_disconnected() {
    let link = MqttClient::new(&unreachable_broker(), Some("aio_key".to_string())).unwrap();

    assert!(!link.is_connected());
    assert_eq!(link.account(), "lab-account");
}

#[test]
fn test_link_rejects_invalid_options() {
    let mut config = unreachable_broker();
    config.keep_alive_secs = 1;
    assert!(matches!(
        MqttClient::new(&config, None),
        Err(MqttError::InvalidConfig(_))
    ));

    let mut config = unreachable_broker();
    config.host = String::new();
    assert!(matches!(
        MqttClient::new(&config, None),
        Err(MqttError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_publish_and_subscribe_require_connection() {
    let mut link = MqttClient::new(&unreachable_broker(), None).unwrap();

    let published = link.publish("temperature", Bytes::from_static(b"21.5")).await;
    assert!(matches!(published, Err(MqttError::NotConnected)));

    let subscribed = link.subscribe("temperature").await;
    assert!(matches!(subscribed, Err(MqttError::NotConnected)));
}

#[tokio::test]
async fn test_pump_without_connection_is_idle() {
    let mut link = MqttClient::new(&unreachable_broker(), None).unwrap();

    link.pump(Duration::from_millis(10)).await.unwrap();

    assert!(link.take_events().is_empty());
    // Disconnecting a link that never connected is a no-op
    link.disconnect().await.unwrap();
    assert!(link.take_events().is_empty());
}

#[tokio::test]
async fn test_connect_to_unreachable_broker_fails() {
    let mut link = MqttClient::new(&unreachable_broker(), None).unwrap();

    let result = timeout(Duration::from_secs(5), link.connect())
        .await
        .expect("connect should fail fast when the port is closed");

    assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    assert!(!link.is_connected());
}

#[tokio::test]
async fn test_worker_ends_run_when_broker_unreachable_at_startup() {
    let mut config = test_config(PublishMode::RawJson);
    config.mqtt = unreachable_broker();
    let link = MqttClient::new(&config.mqtt, None).unwrap();
    let queue = ScriptedQueue::new([Message::shutdown()]);

    let result = timeout(
        Duration::from_secs(5),
        QueueDrainWorker::new(config, link, queue).run(),
    )
    .await
    .expect("worker should not hang on an unreachable broker");

    assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
}
