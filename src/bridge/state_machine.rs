//! Broker connection state machine
//!
//! Wraps a [`BrokerLink`] and turns the events it reports into explicit
//! [`ConnectionState`] transitions. An unexpected disconnect consults the
//! configured [`ReconnectPolicy`], which only schedules a deadline. The owner
//! of the state machine performs the attempt on its own task through
//! [`ConnectionStateMachine::reconnect_if_due`].

use crate::config::{ReconnectPolicyKind, ReconnectSection};
use crate::error::BridgeError;
use crate::observability::metrics::metrics;
use crate::protocol::{resolve_feed_name, validate_feed_name};
use crate::transport::mqtt::{ConnectionState, ReconnectConfig};
use crate::transport::{BrokerLink, LinkEvent};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What a reconnect policy wants after a lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Attempt to reconnect once the delay has elapsed
    RetryAfter(Duration),
    /// Leave reconnection to the caller
    Manual,
    /// Attempts are exhausted for this outage
    GiveUp,
}

/// Decides whether and when to reconnect after an unexpected disconnect
pub trait ReconnectPolicy: Send {
    fn name(&self) -> &'static str;

    /// Decision for the given 1-based attempt of the current outage
    fn next_attempt(&mut self, attempt: u32) -> ReconnectDecision;

    /// Called once a connection is established again
    fn reset(&mut self) {}
}

/// Never reconnects on its own
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualReconnect;

impl ReconnectPolicy for ManualReconnect {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn next_attempt(&mut self, _attempt: u32) -> ReconnectDecision {
        ReconnectDecision::Manual
    }
}

/// Reconnects following a backoff pattern, optionally bounded
#[derive(Debug, Clone, Default)]
pub struct BackoffReconnect {
    config: ReconnectConfig,
}

impl BackoffReconnect {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }
}

impl ReconnectPolicy for BackoffReconnect {
    fn name(&self) -> &'static str {
        "backoff"
    }

    fn next_attempt(&mut self, attempt: u32) -> ReconnectDecision {
        match self.config.max_attempts {
            Some(max) if attempt > max => ReconnectDecision::GiveUp,
            _ => ReconnectDecision::RetryAfter(Duration::from_millis(
                self.config.calculate_backoff_delay(attempt),
            )),
        }
    }
}

/// Build the policy named by the configuration
pub fn policy_from_config(section: &ReconnectSection) -> Box<dyn ReconnectPolicy> {
    match section.policy {
        ReconnectPolicyKind::Manual => Box::new(ManualReconnect),
        ReconnectPolicyKind::Backoff => {
            let config = ReconnectConfig::from(section);
            match config.calculate_max_total_time() {
                Some(total_ms) => info!(
                    max_attempts = ?config.max_attempts,
                    total_ms,
                    "Backoff reconnect gives up after {}ms of retries",
                    total_ms
                ),
                None => info!("Backoff reconnect retries without limit"),
            }
            Box::new(BackoffReconnect::new(config))
        }
    }
}

/// Explicit connection state over a broker link
pub struct ConnectionStateMachine<L: BrokerLink> {
    link: L,
    state: ConnectionState,
    policy: Box<dyn ReconnectPolicy>,
    reconnect_at: Option<Instant>,
    attempts: u32,
}

impl<L: BrokerLink> ConnectionStateMachine<L> {
    pub fn new(link: L, policy: Box<dyn ReconnectPolicy>) -> Self {
        Self {
            link,
            state: ConnectionState::Disconnected,
            policy,
            reconnect_at: None,
            attempts: 0,
        }
    }

    /// Swap the reconnect policy; a scheduled attempt keeps its deadline
    pub fn set_reconnect_policy(&mut self, policy: Box<dyn ReconnectPolicy>) {
        self.policy = policy;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Deadline of the next scheduled reconnect attempt
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Attempts made in the current outage
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(
                from = self.state.as_str(),
                to = next.as_str(),
                policy = self.policy.name(),
                "Broker connection state changed"
            );
            self.state = next;
        }
    }

    /// Connect the link; a rejected CONNACK surfaces as [`BridgeError::BrokerRejected`]
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.is_connected() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        metrics().mqtt_connection_attempt();

        if let Err(e) = self.link.connect().await {
            self.transition(ConnectionState::Disconnected);
            metrics().mqtt_connection_failed();
            return Err(BridgeError::ConnectionFailed(Box::new(e)));
        }

        self.handle_events()
    }

    /// Disconnect on request; cancels any scheduled reconnect
    pub async fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.reconnect_at = None;
        let result = self
            .link
            .disconnect()
            .await
            .map_err(|e| BridgeError::Transport(Box::new(e)));

        // A rejected handshake cannot surface here, the link is going away
        if let Err(e) = self.handle_events() {
            debug!("Ignoring event while disconnecting: {}", e);
        }
        self.transition(ConnectionState::Disconnected);
        metrics().mqtt_disconnected();
        result
    }

    /// Service link I/O and apply every event it reported, in arrival order
    pub async fn pump(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        let pumped = self
            .link
            .pump(timeout)
            .await
            .map_err(|e| BridgeError::Transport(Box::new(e)));
        self.handle_events()?;
        pumped
    }

    pub async fn publish(&mut self, feed: &str, payload: Bytes) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::publish_failed(feed, "broker link is not connected"));
        }

        match self.link.publish(feed, payload).await {
            Ok(()) => {
                metrics().mqtt_message_published();
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(BridgeError::publish_failed(feed, e.to_string()))
            }
        }
    }

    /// Subscribe to a feed; a missing or blank feed falls back to `default_feed`
    pub async fn subscribe(
        &mut self,
        feed: Option<&str>,
        default_feed: &str,
    ) -> Result<(), BridgeError> {
        let feed = resolve_feed_name(feed, default_feed);
        validate_feed_name(feed)?;
        self.link
            .subscribe(feed)
            .await
            .map_err(|e| BridgeError::Transport(Box::new(e)))
    }

    /// Attempt a scheduled reconnect once its deadline has passed
    ///
    /// Transport failures schedule the next attempt; only a broker rejection
    /// is returned as an error.
    pub async fn reconnect_if_due(&mut self) -> Result<(), BridgeError> {
        let Some(deadline) = self.reconnect_at else {
            return Ok(());
        };
        if Instant::now() < deadline || self.is_connected() {
            return Ok(());
        }

        self.reconnect_at = None;
        info!(attempt = self.attempts, "Attempting to reconnect to broker");

        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e @ BridgeError::BrokerRejected { .. }) => Err(e),
            Err(e) => {
                warn!(attempt = self.attempts, "Reconnect attempt failed: {}", e);
                self.schedule_reconnect();
                Ok(())
            }
        }
    }

    fn handle_events(&mut self) -> Result<(), BridgeError> {
        for event in self.link.take_events() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: LinkEvent) -> Result<(), BridgeError> {
        match event {
            LinkEvent::ConnAck { code: 0 } => {
                self.transition(ConnectionState::Connected);
                if self.attempts > 0 {
                    info!(attempts = self.attempts, "Reconnected to broker");
                }
                self.attempts = 0;
                self.reconnect_at = None;
                self.policy.reset();
                metrics().mqtt_connection_established();
            }
            LinkEvent::ConnAck { code } => {
                self.transition(ConnectionState::Disconnected);
                self.reconnect_at = None;
                metrics().mqtt_connection_failed();
                error!(code, "Broker rejected the connection");
                return Err(BridgeError::BrokerRejected { code });
            }
            LinkEvent::Disconnected { code: 0, reason } => {
                info!(reason = %reason, "Disconnected from broker");
                self.transition(ConnectionState::Disconnected);
                metrics().mqtt_disconnected();
            }
            LinkEvent::Disconnected { code, reason } => {
                let previous = self.state;
                self.transition(ConnectionState::Disconnected);

                if previous == ConnectionState::Connected {
                    warn!(code, reason = %reason, "{}", BridgeError::UnexpectedDisconnect { code });
                    metrics().mqtt_connection_lost();
                    self.schedule_reconnect();
                } else if self.attempts > 0 {
                    warn!(code, reason = %reason, "Connection lost while reconnecting");
                    self.schedule_reconnect();
                } else {
                    debug!(code, reason = %reason, "Link reported disconnect while not connected");
                }
            }
            LinkEvent::Message { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "Broker message on subscribed feed");
            }
        }
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        self.attempts += 1;
        match self.policy.next_attempt(self.attempts) {
            ReconnectDecision::RetryAfter(delay) => {
                info!(
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ReconnectDecision::Manual => {
                warn!("Reconnect policy is manual, the link stays down until connect is called");
                self.reconnect_at = None;
                self.attempts = 0;
            }
            ReconnectDecision::GiveUp => {
                error!(
                    attempts = self.attempts - 1,
                    "Giving up on reconnecting to broker"
                );
                self.reconnect_at = None;
            }
        }
    }
}
