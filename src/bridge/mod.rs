//! The feed bridge worker
//!
//! # Architecture
//!
//! - [`worker`] - The queue drain loop and the startup gate
//! - [`state_machine`] - Connection state and reconnect policies over a [`BrokerLink`](crate::transport::BrokerLink)
//! - [`publish`] - Pure translation of messages into publish calls
//! - [`undeliverable`] - What happens to messages while the link is down
//! - [`shutdown`] - Cooperative shutdown
//! - [`queue`] - Inbound and outbound queue seams
//! - [`version`] - Framework version comparison

pub mod publish;
pub mod queue;
pub mod shutdown;
pub mod state_machine;
pub mod undeliverable;
pub mod version;
pub mod worker;

pub use publish::{
    strategy_for, FlattenedFaceAttributes, GenericValues, PublishCall, PublishStrategy, RawJson,
    Translation,
};
pub use queue::{channel_queue, ChannelQueue, InboundQueue, OutboundQueue};
pub use shutdown::{ShutdownCoordinator, WorkerState};
pub use state_machine::{
    BackoffReconnect, ConnectionStateMachine, ManualReconnect, ReconnectDecision, ReconnectPolicy,
};
pub use undeliverable::{Disposition, UndeliverableHandler};
pub use version::{check_compatibility, compare_versions};
pub use worker::{QueueDrainWorker, RunOutcome, WorkerStats};
