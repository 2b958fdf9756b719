//! Test helpers and utilities for integration tests

use feedbridge::bridge::{InboundQueue, QueueDrainWorker, RunOutcome, WorkerStats};
use feedbridge::config::{BridgeConfig, PublishMode};
use feedbridge::protocol::Message;
use feedbridge::testing::{test_bridge_config, MockBrokerLink};
use serde_json::Value;

/// Configuration with short loop timings for the given publish mode
#[allow(dead_code)]
pub fn test_config(mode: PublishMode) -> BridgeConfig {
    test_bridge_config(mode)
}

/// Message carrying the given object as its extended data
#[allow(dead_code)]
pub fn message_with(topic: &str, data: Value) -> Message {
    let Value::Object(map) = data else {
        panic!("extended data must be a JSON object");
    };
    Message::new(topic)
        .with_sender("cam-01", "demographic_camera")
        .with_extended_data(map)
}

/// Run a worker that is expected to reach a sentinel-driven shutdown
#[allow(dead_code)]
pub async fn run_to_completion<Q: InboundQueue>(
    config: BridgeConfig,
    link: MockBrokerLink,
    queue: Q,
) -> WorkerStats {
    match QueueDrainWorker::new(config, link, queue).run().await {
        Ok(RunOutcome::Completed(stats)) => stats,
        other => panic!("Expected a completed run, got {other:?}"),
    }
}
