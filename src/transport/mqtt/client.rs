//! Impure I/O operations for the MQTT link
//!
//! The client owns the rumqttc event loop and only advances it when the
//! worker pumps, connects or disconnects. Nothing runs in the background: a
//! transport error drops the event loop, so a new connection is only made
//! when the connection state machine asks for one.

use super::connection::{configure_mqtt_options, connack_code, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::protocol::{feed_topic, resolve_feed_topic, validate_feed_name};
use crate::transport::{BrokerLink, LinkEvent};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, QoS};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts at enqueueing a publish when the request buffer is full
const PUBLISH_ATTEMPTS: u32 = 3;

/// How long a full request buffer is pumped before retrying a publish
const BACKPRESSURE_PUMP: Duration = Duration::from_millis(100);

/// Upper bound for flushing our DISCONNECT packet
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Code reported for a connection lost without a broker supplied reason
const CONNECTION_LOST_CODE: u8 = 1;

/// MQTT implementation of [`BrokerLink`]
pub struct MqttClient {
    account: String,
    options: MqttOptions,
    request_capacity: usize,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    connected: bool,
    events: VecDeque<LinkEvent>,
    subscribed_topics: Vec<String>,
}

impl MqttClient {
    /// Create an unconnected client; the broker key comes from the environment
    /// variable named in the configuration.
    pub fn new(config: &MqttSection, key: Option<String>) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(config, key.as_deref())?;

        Ok(Self {
            account: config.username.clone(),
            options,
            request_capacity: config.request_capacity,
            client: None,
            event_loop: None,
            connected: false,
            events: VecDeque::new(),
            subscribed_topics: Vec::new(),
        })
    }

    /// Account name used in feed topics
    pub fn account(&self) -> &str {
        &self.account
    }

    fn drop_connection(&mut self) {
        self.connected = false;
        self.client = None;
        self.event_loop = None;
    }

    /// Apply a routed event to link state and buffer what the caller needs to see
    fn record_event(&mut self, event: Event) {
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged { code } => {
                if code == 0 {
                    self.connected = true;
                    self.resubscribe_to_topics();
                } else {
                    self.drop_connection();
                }
                self.events.push_back(LinkEvent::ConnAck { code });
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", topic = %topic, retain, "Received broker message");
                metrics().mqtt_message_received();
                self.events.push_back(LinkEvent::Message { topic, payload });
            }
            EventRoute::Disconnected => {
                warn!("Broker sent DISCONNECT");
                self.drop_connection();
                self.events.push_back(LinkEvent::Disconnected {
                    code: CONNECTION_LOST_CODE,
                    reason: "Broker disconnected".to_string(),
                });
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                if let Err(e) = MessageHandler::validate_subscription_success(&return_codes) {
                    error!(packet_id, "{}", e);
                } else {
                    debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                }
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::DisconnectSent | EventRoute::OutgoingEvent => {}
        }
    }

    /// Turn an event loop error into a link event and forget the connection
    fn record_connection_error(&mut self, error: ConnectionError) {
        self.drop_connection();
        match error {
            ConnectionError::ConnectionRefused(code) => {
                self.events.push_back(LinkEvent::ConnAck {
                    code: connack_code(code),
                });
            }
            other => {
                error!("MQTT event loop error: {}", other);
                self.events.push_back(LinkEvent::Disconnected {
                    code: CONNECTION_LOST_CODE,
                    reason: other.to_string(),
                });
            }
        }
    }

    fn resubscribe_to_topics(&self) {
        let Some(client) = &self.client else {
            return;
        };
        for topic in &self.subscribed_topics {
            if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }

    fn connected_client(&self) -> Result<&AsyncClient, MqttError> {
        match (&self.client, self.connected) {
            (Some(client), true) => Ok(client),
            _ => Err(MqttError::NotConnected),
        }
    }
}

#[async_trait]
impl BrokerLink for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.connected {
            return Ok(());
        }

        let (broker_host, broker_port) = self.options.broker_address();
        info!(host = %broker_host, port = broker_port, "Connecting to MQTT broker");

        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), self.request_capacity);

        // The first poll opens the network connection and reads the CONNACK
        match event_loop.poll().await {
            Ok(event) => {
                self.client = Some(client);
                self.event_loop = Some(event_loop);
                self.record_event(event);
                Ok(())
            }
            Err(ConnectionError::ConnectionRefused(code)) => {
                self.events.push_back(LinkEvent::ConnAck {
                    code: connack_code(code),
                });
                Ok(())
            }
            Err(e) => Err(MqttError::ConnectionFailed(Box::new(e))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        if !self.connected {
            return Ok(());
        }

        if let Some(client) = &self.client {
            client
                .try_disconnect()
                .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))?;
        }

        if let Some(event_loop) = self.event_loop.as_mut() {
            let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
                loop {
                    match event_loop.poll().await {
                        Ok(event) => {
                            if MessageHandler::route_mqtt_event(&event) == EventRoute::DisconnectSent
                            {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .await;
            if flushed.is_err() {
                warn!("DISCONNECT was not flushed before the timeout");
            }
        }

        self.drop_connection();
        self.events.push_back(LinkEvent::Disconnected {
            code: 0,
            reason: "Client disconnected".to_string(),
        });
        info!("MQTT client disconnected");
        Ok(())
    }

    async fn publish(&mut self, feed: &str, payload: Bytes) -> Result<(), Self::Error> {
        validate_feed_name(feed)?;
        let topic = feed_topic(&self.account, feed);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            let result =
                self.connected_client()?
                    .try_publish(topic.clone(), QoS::AtLeastOnce, false, payload.to_vec());

            match result {
                Ok(()) => {
                    debug!(target: "mqtt_transport", topic = %topic, bytes = payload.len(), "Queued publish");
                    return Ok(());
                }
                Err(ClientError::TryRequest(_)) if attempt < PUBLISH_ATTEMPTS => {
                    debug!(topic = %topic, attempt, "Request buffer full, pumping before retry");
                    self.pump(BACKPRESSURE_PUMP).await?;
                }
                Err(e) => return Err(MqttError::PublishFailed(Box::new(e))),
            }
        }

        Err(MqttError::PublishFailed(
            format!("request buffer full after {PUBLISH_ATTEMPTS} attempts").into(),
        ))
    }

    async fn subscribe(&mut self, feed: &str) -> Result<(), Self::Error> {
        let topic = resolve_feed_topic(&self.account, Some(feed), "")?;
        self.connected_client()?
            .try_subscribe(topic.clone(), QoS::AtLeastOnce)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        if !self.subscribed_topics.contains(&topic) {
            self.subscribed_topics.push(topic.clone());
        }
        info!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn pump(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, event_loop.poll()).await {
            Err(_) => Ok(()),
            Ok(Ok(event)) => {
                self.record_event(event);
                Ok(())
            }
            Ok(Err(e)) => {
                self.record_connection_error(e);
                Ok(())
            }
        }
    }

    fn take_events(&mut self) -> Vec<LinkEvent> {
        self.events.drain(..).collect()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
