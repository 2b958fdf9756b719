//! Inbound and outbound queue seams
//!
//! The hosting framework owns the queues; the worker only needs an emptiness
//! check and a bounded wait on the inbound side and a non-blocking put on the
//! outbound side. Tokio channels are the in-process implementation.

use crate::error::BridgeError;
use crate::protocol::Message;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Single-consumer queue of messages for the bridge worker
#[async_trait]
pub trait InboundQueue: Send {
    fn is_empty(&self) -> bool;

    /// True once no producer can enqueue anything else
    fn is_closed(&self) -> bool {
        false
    }

    /// Wait at most `timeout` for the next message; `Ok(None)` when none arrived
    async fn get(&mut self, timeout: Duration) -> Result<Option<Message>, BridgeError>;
}

/// Queue the worker hands messages it cannot deliver
pub trait OutboundQueue: Send {
    fn put(&mut self, message: Message) -> Result<(), BridgeError>;
}

/// Inbound queue backed by a bounded tokio channel
#[derive(Debug)]
pub struct ChannelQueue {
    receiver: mpsc::Receiver<Message>,
}

impl ChannelQueue {
    pub fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self { receiver }
    }
}

/// Create a producer handle and the matching inbound queue
pub fn channel_queue(capacity: usize) -> (mpsc::Sender<Message>, ChannelQueue) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, ChannelQueue::new(receiver))
}

#[async_trait]
impl InboundQueue for ChannelQueue {
    fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    async fn get(&mut self, timeout: Duration) -> Result<Option<Message>, BridgeError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(BridgeError::queue_read("inbound queue is closed")),
        }
    }
}

impl OutboundQueue for mpsc::Sender<Message> {
    fn put(&mut self, message: Message) -> Result<(), BridgeError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::queue_write("outbound queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::queue_write("outbound queue is closed")
            }
        })
    }
}
