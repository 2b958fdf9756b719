//! Handling of messages dequeued while the broker link is down

use crate::bridge::queue::OutboundQueue;
use crate::config::{PublishSection, UndeliverablePolicy};
use crate::observability::metrics::metrics;
use crate::protocol::Message;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

/// What happened to an undeliverable message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dropped,
    /// Held for replay; `evicted_oldest` is set when the buffer overflowed
    Requeued { evicted_oldest: bool },
    DeadLettered,
}

/// Applies the configured [`UndeliverablePolicy`]
pub struct UndeliverableHandler {
    policy: UndeliverablePolicy,
    capacity: usize,
    pending: VecDeque<Message>,
    dead_letter: Option<Box<dyn OutboundQueue>>,
}

impl UndeliverableHandler {
    pub fn new(policy: UndeliverablePolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            pending: VecDeque::new(),
            dead_letter: None,
        }
    }

    pub fn from_config(section: &PublishSection) -> Self {
        Self::new(section.on_disconnected, section.requeue_capacity)
    }

    pub fn with_dead_letter(mut self, queue: Box<dyn OutboundQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn policy(&self) -> UndeliverablePolicy {
        self.policy
    }

    /// Number of messages waiting for replay
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Oldest message waiting for replay
    pub fn next_pending(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }

    pub fn handle(&mut self, message: Message) -> Disposition {
        match self.policy {
            UndeliverablePolicy::Drop => self.drop_message(&message, "broker link is down"),
            UndeliverablePolicy::Requeue => {
                let evicted_oldest = self.pending.len() >= self.capacity;
                if let Some(evicted) = evicted_oldest.then(|| self.pending.pop_front()).flatten() {
                    warn!(
                        message_id = %evicted.message_id,
                        capacity = self.capacity,
                        "Requeue buffer full, dropping oldest message"
                    );
                    metrics().message_dropped();
                }
                debug!(message_id = %message.message_id, "Requeued message until the broker link is back");
                self.pending.push_back(message);
                metrics().message_requeued();
                Disposition::Requeued { evicted_oldest }
            }
            UndeliverablePolicy::DeadLetter => {
                let Some(queue) = self.dead_letter.as_mut() else {
                    return self.drop_message(&message, "no dead letter queue is attached");
                };
                let message_id = message.message_id;
                match queue.put(message) {
                    Ok(()) => {
                        debug!(message_id = %message_id, "Dead-lettered message");
                        metrics().message_dead_lettered();
                        Disposition::DeadLettered
                    }
                    Err(e) => {
                        error!(message_id = %message_id, "Dead letter failed, dropping message: {}", e);
                        metrics().message_dropped();
                        Disposition::Dropped
                    }
                }
            }
        }
    }

    fn drop_message(&self, message: &Message, reason: &str) -> Disposition {
        warn!(message_id = %message.message_id, topic = %message.topic, "Dropping message: {}", reason);
        metrics().message_dropped();
        Disposition::Dropped
    }
}
