//! Mock implementations for testing
//!
//! Provides a broker link, an inbound queue and an image predictor that run
//! entirely in memory. Handles are cheap clones sharing state, so a test can
//! keep one while the worker owns another.

use crate::bridge::queue::InboundQueue;
use crate::config::{BridgeConfig, PublishMode};
use crate::error::BridgeError;
use crate::prediction::{ImagePredictor, PredictionOutcome};
use crate::protocol::Message;
use crate::transport::{BrokerLink, LinkEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Bytes);

#[derive(Debug, Error)]
pub enum MockLinkError {
    #[error("Mock connection failure")]
    ConnectionFailed,
    #[error("Mock publish failure")]
    PublishFailed,
    #[error("Mock link is not connected")]
    NotConnected,
}

/// In-memory broker link
///
/// Connects answer with the configured CONNACK code. Events injected with
/// [`inject_event`](Self::inject_event) are delivered on the next pump, in
/// injection order.
#[derive(Debug, Clone, Default)]
pub struct MockBrokerLink {
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    injected: Arc<std::sync::Mutex<VecDeque<LinkEvent>>>,
    events: VecDeque<LinkEvent>,
    connected: bool,
    connack_code: Arc<AtomicU8>,
    failing_connects: Arc<AtomicU32>,
    fail_publish: Arc<AtomicBool>,
    connect_calls: Arc<AtomicU32>,
    pump_calls: Arc<AtomicU32>,
}

impl MockBrokerLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer connects with a non-zero CONNACK code
    pub fn with_connack_code(self, code: u8) -> Self {
        self.connack_code.store(code, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` connects at the transport level
    pub fn with_failed_connects(self, count: u32) -> Self {
        self.fail_next_connects(count);
        self
    }

    pub fn with_publish_failure(self) -> Self {
        self.fail_publish.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Queue an event for delivery on the next pump
    pub fn inject_event(&self, event: LinkEvent) {
        if let Ok(mut injected) = self.injected.lock() {
            injected.push_back(event);
        }
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        self.inject_event(LinkEvent::Disconnected {
            code: 1,
            reason: "Mock connection lost".to_string(),
        });
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn pump_count(&self) -> u32 {
        self.pump_calls.load(Ordering::SeqCst)
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Published payloads as UTF-8 text, for readable assertions
    pub async fn get_published_text(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(feed, payload)| (feed.clone(), String::from_utf8_lossy(payload).into_owned()))
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    fn apply(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::ConnAck { code } => self.connected = *code == 0,
            LinkEvent::Disconnected { .. } => self.connected = false,
            LinkEvent::Message { .. } => {}
        }
    }
}

#[async_trait]
impl BrokerLink for MockBrokerLink {
    type Error = MockLinkError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected {
            return Ok(());
        }

        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(MockLinkError::ConnectionFailed);
        }

        let event = LinkEvent::ConnAck {
            code: self.connack_code.load(Ordering::SeqCst),
        };
        self.apply(&event);
        self.events.push_back(event);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        if !self.connected {
            return Ok(());
        }
        let event = LinkEvent::Disconnected {
            code: 0,
            reason: "Client disconnected".to_string(),
        };
        self.apply(&event);
        self.events.push_back(event);
        Ok(())
    }

    async fn publish(&mut self, feed: &str, payload: Bytes) -> Result<(), Self::Error> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MockLinkError::PublishFailed);
        }
        if !self.connected {
            return Err(MockLinkError::NotConnected);
        }
        self.published.lock().await.push((feed.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&mut self, feed: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockLinkError::NotConnected);
        }
        self.subscriptions.lock().await.push(feed.to_string());
        Ok(())
    }

    async fn pump(&mut self, _timeout: Duration) -> Result<(), Self::Error> {
        self.pump_calls.fetch_add(1, Ordering::SeqCst);
        let injected: Vec<LinkEvent> = match self.injected.lock() {
            Ok(mut injected) => injected.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for event in injected {
            self.apply(&event);
            self.events.push_back(event);
        }
        Ok(())
    }

    fn take_events(&mut self) -> Vec<LinkEvent> {
        self.events.drain(..).collect()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Inbound queue that replays a fixed script of reads
///
/// `Err` entries surface as queue read errors. Once the script is exhausted
/// the queue reports empty; it never closes.
#[derive(Debug, Default)]
pub struct ScriptedQueue {
    entries: VecDeque<Result<Option<Message>, String>>,
}

impl ScriptedQueue {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            entries: messages.into_iter().map(|m| Ok(Some(m))).collect(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.entries.push_back(Ok(Some(message)));
    }

    /// A read that yields nothing, like a null entry on the queue
    pub fn push_empty_read(&mut self) {
        self.entries.push_back(Ok(None));
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.entries.push_back(Err(error.into()));
    }
}

#[async_trait]
impl InboundQueue for ScriptedQueue {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn get(&mut self, _timeout: Duration) -> Result<Option<Message>, BridgeError> {
        match self.entries.pop_front() {
            Some(Ok(message)) => Ok(message),
            Some(Err(error)) => Err(BridgeError::queue_read(error)),
            None => Ok(None),
        }
    }
}

/// Predictor returning a fixed outcome
#[derive(Debug, Clone)]
pub struct MockImagePredictor {
    pub outcome: PredictionOutcome,
    pub calls: Arc<AtomicU32>,
}

impl MockImagePredictor {
    pub fn new(outcome: PredictionOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl ImagePredictor for MockImagePredictor {
    async fn predict(&self, _image: Bytes) -> PredictionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Valid configuration for tests, with short loop timings
pub fn test_bridge_config(mode: PublishMode) -> BridgeConfig {
    let mode = match mode {
        PublishMode::RawJson => "raw_json",
        PublishMode::FlattenedFaceAttributes => "flattened_face_attributes",
        PublishMode::GenericValues => "generic_values",
    };
    let toml_content = format!(
        r#"
[bridge]
framework_version = "2.1.0"
min_framework_version = "2.0.0"

[mqtt]
host = "localhost"
username = "test-account"

[publish]
mode = "{mode}"
default_feed = "sensor"

[worker]
pump_timeout_ms = 10
dequeue_timeout_ms = 10
idle_sleep_ms = 10
shutdown_grace_ms = 100
"#
    );
    BridgeConfig::from_toml_str(&toml_content).expect("test config is valid")
}
