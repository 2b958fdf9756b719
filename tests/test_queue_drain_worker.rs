//! Queue drain worker behaviour
//!
//! Drives the worker end to end against the in-memory broker link and queue
//! and checks what reaches the broker.

use bytes::Bytes;
use feedbridge::bridge::{
    GenericValues, PublishCall, PublishStrategy, QueueDrainWorker, RunOutcome, Translation,
    WorkerState,
};
use feedbridge::config::PublishMode;
use feedbridge::error::BridgeError;
use feedbridge::prediction::{ImagePredictor, PredictionOutcome};
use feedbridge::protocol::Message;
use feedbridge::testing::{MockBrokerLink, MockImagePredictor, ScriptedQueue};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

mod test_helpers;
use test_helpers::{message_with, run_to_completion, test_config};

#[tokio::test(start_paused = true)]
async fn test_shutdown_sentinel_stops_worker_without_publishing() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([Message::new("ShutDown"), Message::new("after-shutdown")]);

    let stats = run_to_completion(test_config(PublishMode::RawJson), link.clone(), queue).await;

    assert!(link.get_published().await.is_empty());
    assert_eq!(stats.received, 1);
    assert_eq!(stats.published, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_handle_reports_stopped() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([Message::shutdown()]);
    let worker = QueueDrainWorker::new(test_config(PublishMode::RawJson), link, queue);
    let shutdown = worker.shutdown_handle();
    assert!(shutdown.is_alive());

    let outcome = worker.run().await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(shutdown.state(), WorkerState::Stopped);
    // A second request has no further effect
    assert!(!shutdown.shutdown().await);
    assert_eq!(shutdown.state(), WorkerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_raw_json_publishes_once_per_message() {
    let link = MockBrokerLink::new();
    let first = message_with("motion", json!({"zone": "hall"}));
    let second = message_with("motion", json!({"zone": "lab"}));
    let queue = ScriptedQueue::new([first.clone(), second.clone(), Message::shutdown()]);

    let stats = run_to_completion(test_config(PublishMode::RawJson), link.clone(), queue).await;

    let published = link.get_published().await;
    assert_eq!(
        published,
        vec![
            ("sensor".to_string(), first.stringify().unwrap()),
            ("sensor".to_string(), second.stringify().unwrap()),
        ]
    );
    assert_eq!(stats.published, 2);
    assert_eq!(stats.received, 3);
}

#[tokio::test(start_paused = true)]
async fn test_face_attributes_publish_one_feed_per_attribute() {
    let link = MockBrokerLink::new();
    let message = message_with(
        "face-detected",
        json!({"predictions": [{"faceAttributes": {"age": 30, "gender": "male"}}]}),
    );
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    assert_eq!(
        link.get_published_text().await,
        vec![
            ("age".to_string(), "30".to_string()),
            ("gender".to_string(), "male".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_nested_face_attribute_publishes_mean() {
    let link = MockBrokerLink::new();
    let message = message_with(
        "face-detected",
        json!({"predictions": [{"faceAttributes": {"emotion": {"happy": 0.8, "sad": 0.2}}}]}),
    );
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    let published = link.get_published_text().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "emotion");
    let mean: f64 = published[0].1.parse().unwrap();
    assert!((mean - 0.5).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_missing_predictions_publishes_nothing_and_keeps_running() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([
        message_with("face-detected", json!({})),
        message_with(
            "face-detected",
            json!({"predictions": [{"faceAttributes": {"age": 52}}]}),
        ),
        Message::shutdown(),
    ]);

    let stats = run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    assert_eq!(stats.translation_errors, 1);
    assert_eq!(
        link.get_published_text().await,
        vec![("age".to_string(), "52".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_generic_values_publishes_top_level_entries() {
    let link = MockBrokerLink::new();
    let message = message_with("climate", json!({"humidity": 40, "temperature": 21.5}));
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    run_to_completion(test_config(PublishMode::GenericValues), link.clone(), queue).await;

    assert_eq!(
        link.get_published_text().await,
        vec![
            ("humidity".to_string(), "40".to_string()),
            ("temperature".to_string(), "21.5".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_messages_are_dropped() {
    let link = MockBrokerLink::new();
    link.drop_connection();
    let queue = ScriptedQueue::new([
        message_with("motion", json!({"zone": "hall"})),
        Message::shutdown(),
    ]);

    let stats = run_to_completion(test_config(PublishMode::RawJson), link.clone(), queue).await;

    assert!(link.get_published().await.is_empty());
    assert_eq!(stats.dropped, 1);
    // The manual policy never reconnects on its own
    assert_eq!(link.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_errors_do_not_stop_the_loop() {
    let link = MockBrokerLink::new();
    let mut queue = ScriptedQueue::default();
    queue.push_error("pipe broken");
    queue.push_empty_read();
    queue.push(message_with("motion", json!({"zone": "hall"})));
    queue.push(Message::shutdown());

    let stats = run_to_completion(test_config(PublishMode::RawJson), link.clone(), queue).await;

    assert_eq!(stats.queue_errors, 1);
    assert_eq!(stats.published, 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failures_are_logged_not_fatal() {
    let link = MockBrokerLink::new().with_publish_failure();
    let queue = ScriptedQueue::new([
        message_with("climate", json!({"humidity": 40, "temperature": 21.5})),
        message_with("climate", json!({"humidity": 41})),
        Message::shutdown(),
    ]);

    let stats = run_to_completion(test_config(PublishMode::GenericValues), link.clone(), queue).await;

    // The first failing call abandons the rest of that message
    assert_eq!(stats.publish_failures, 2);
    assert_eq!(stats.published, 0);
    assert_eq!(stats.received, 3);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_feed_names_are_skipped() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([
        message_with("climate", json!({"rooms/hall": 1, "humidity": 40})),
        Message::shutdown(),
    ]);

    let stats = run_to_completion(test_config(PublishMode::GenericValues), link.clone(), queue).await;

    assert_eq!(
        link.get_published_text().await,
        vec![("humidity".to_string(), "40".to_string())]
    );
    assert_eq!(stats.publish_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_face_attribute_keys_are_published_verbatim() {
    let link = MockBrokerLink::new();
    let message = message_with(
        "face-detected",
        json!({"predictions": [{"faceAttributes": {" age ": 30, "": "x"}}]}),
    );
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    let stats = run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    assert_eq!(
        link.get_published_text().await,
        vec![(" age ".to_string(), "30".to_string())]
    );
    assert_eq!(stats.publish_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_predictor_outcome_flows_through_worker() {
    let link = MockBrokerLink::new();
    let predictor = MockImagePredictor::new(PredictionOutcome::Predictions(vec![
        json!({"faceAttributes": {"gender": "female", "age": 27}}),
    ]));

    let outcome = predictor.predict(Bytes::from_static(b"jpeg-bytes")).await;
    let message = Message::new("face-detected")
        .with_sender("cam-01", "demographic_camera")
        .with_extended_data(outcome.into_extended_data());
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    let stats = run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.published, 2);
    assert_eq!(
        link.get_published_text().await,
        vec![
            ("gender".to_string(), "female".to_string()),
            ("age".to_string(), "27".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_predictor_error_publishes_nothing() {
    let link = MockBrokerLink::new();
    let predictor = MockImagePredictor::new(PredictionOutcome::Error("Request failed".to_string()));

    let outcome = predictor.predict(Bytes::from_static(b"jpeg-bytes")).await;
    let message = Message::new("face-detected").with_extended_data(outcome.into_extended_data());
    let queue = ScriptedQueue::new([message, Message::shutdown()]);

    let stats = run_to_completion(
        test_config(PublishMode::FlattenedFaceAttributes),
        link.clone(),
        queue,
    )
    .await;

    assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
    assert!(link.get_published().await.is_empty());
    assert_eq!(stats.translation_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_version_gate_prevents_connecting() {
    let link = MockBrokerLink::new();
    let mut config = test_config(PublishMode::RawJson);
    config.bridge.framework_version = "2.0.0".to_string();
    config.bridge.min_framework_version = "2.1.0".to_string();
    let queue = ScriptedQueue::new([message_with("motion", json!({})), Message::shutdown()]);

    let outcome = QueueDrainWorker::new(config, link.clone(), queue)
        .run()
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Incompatible {
            current: "2.0.0".to_string(),
            minimum: "2.1.0".to_string(),
        }
    );
    assert_eq!(link.connect_count(), 0);
    assert_eq!(link.pump_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broker_rejection_is_fatal() {
    let link = MockBrokerLink::new().with_connack_code(4);
    let queue = ScriptedQueue::new([Message::shutdown()]);

    let result = QueueDrainWorker::new(test_config(PublishMode::RawJson), link, queue)
        .run()
        .await;

    assert!(matches!(result, Err(BridgeError::BrokerRejected { code: 4 })));
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_at_startup_is_fatal() {
    let link = MockBrokerLink::new().with_failed_connects(1);
    let queue = ScriptedQueue::new([Message::shutdown()]);

    let result = QueueDrainWorker::new(test_config(PublishMode::RawJson), link, queue)
        .run()
        .await;

    assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
}

/// Publishes a fixed value to a fixed feed for every message
struct HeartbeatStrategy;

impl PublishStrategy for HeartbeatStrategy {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn translate(&self, message: &Message, _default_feed: &str) -> Translation {
        Translation::complete(vec![PublishCall::new("heartbeat", message.topic.clone())])
    }
}

#[tokio::test(start_paused = true)]
async fn test_injected_strategy_replaces_configured_mode() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([Message::new("tick"), Message::shutdown()]);

    let outcome = QueueDrainWorker::new(test_config(PublishMode::RawJson), link.clone(), queue)
        .with_strategy(Box::new(HeartbeatStrategy))
        .run()
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(
        link.get_published_text().await,
        vec![("heartbeat".to_string(), "tick".to_string())]
    );
    assert_eq!(GenericValues.name(), "generic_values");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_completes_within_grace_period() {
    let link = MockBrokerLink::new();
    let queue = ScriptedQueue::new([Message::shutdown()]);
    let started = tokio::time::Instant::now();

    run_to_completion(test_config(PublishMode::RawJson), link, queue).await;

    // Grace period in the test configuration is 100ms
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(200));
}
