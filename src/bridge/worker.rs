//! Queue drain worker
//!
//! One sequential loop on one task: pump the broker link, then either take a
//! message off the inbound queue or sleep briefly. Every per-message and
//! per-iteration error is logged at the loop boundary; only a startup
//! connection failure or a broker rejection ends the run with an error.

use crate::bridge::publish::{strategy_for, PublishStrategy};
use crate::bridge::queue::{InboundQueue, OutboundQueue};
use crate::bridge::shutdown::{ShutdownCoordinator, WorkerState};
use crate::bridge::state_machine::{policy_from_config, ConnectionStateMachine, ReconnectPolicy};
use crate::bridge::undeliverable::{Disposition, UndeliverableHandler};
use crate::bridge::version::check_compatibility;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::observability::health::HealthServer;
use crate::observability::metrics::metrics;
use crate::protocol::{validate_feed_name, Message};
use crate::transport::BrokerLink;
use crate::{publish_span, worker_span};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Per-run message accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub dropped: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub translation_errors: u64,
    pub queue_errors: u64,
}

/// How a run ended without a fatal error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The startup gate refused to run; the broker was never contacted
    Incompatible { current: String, minimum: String },
    /// The loop ran until shutdown
    Completed(WorkerStats),
}

/// Drains the inbound queue into the broker
pub struct QueueDrainWorker<L: BrokerLink, Q: InboundQueue> {
    config: BridgeConfig,
    connection: ConnectionStateMachine<L>,
    queue: Q,
    strategy: Box<dyn PublishStrategy>,
    undeliverable: UndeliverableHandler,
    shutdown: Arc<ShutdownCoordinator>,
    health: Option<Arc<HealthServer>>,
    stats: WorkerStats,
}

impl<L: BrokerLink, Q: InboundQueue> QueueDrainWorker<L, Q> {
    /// Worker with the strategy, reconnect policy and undeliverable policy named by `config`
    pub fn new(config: BridgeConfig, link: L, queue: Q) -> Self {
        let connection = ConnectionStateMachine::new(link, policy_from_config(&config.reconnect));
        let strategy = strategy_for(config.publish.mode);
        let undeliverable = UndeliverableHandler::from_config(&config.publish);
        let shutdown = Arc::new(ShutdownCoordinator::new(config.worker.shutdown_grace()));

        Self {
            config,
            connection,
            queue,
            strategy,
            undeliverable,
            shutdown,
            health: None,
            stats: WorkerStats::default(),
        }
    }

    /// Replace the configured publish strategy with a deployment specific one
    pub fn with_strategy(mut self, strategy: Box<dyn PublishStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: Box<dyn ReconnectPolicy>) -> Self {
        self.connection.set_reconnect_policy(policy);
        self
    }

    /// Outbound queue for dead-lettered messages
    pub fn with_dead_letter(mut self, queue: Box<dyn OutboundQueue>) -> Self {
        self.undeliverable = self.undeliverable.with_dead_letter(queue);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthServer>) -> Self {
        self.health = Some(health);
        self
    }

    /// Handle for requesting shutdown from outside the loop
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Gate on the framework version, connect, drain until shutdown, disconnect
    pub async fn run(mut self) -> Result<RunOutcome, BridgeError> {
        let current = self.config.bridge.framework_version.clone();
        let minimum = self.config.bridge.min_framework_version.clone();
        info!(current = %current, minimum = %minimum, "Checking framework version");
        if !check_compatibility(&current, &minimum) {
            return Ok(RunOutcome::Incompatible { current, minimum });
        }

        info!(
            mode = self.strategy.name(),
            default_feed = %self.config.publish.default_feed,
            "Running feed bridge"
        );
        self.connection.connect().await?;
        self.update_health();
        metrics().set_worker_state(WorkerState::Running.as_str());

        let span = worker_span!(mode = self.strategy.name());
        let result = self.drain().instrument(span).await;

        if let Err(e) = self.connection.disconnect().await {
            warn!("Error while disconnecting from broker: {}", e.sanitized());
        }
        self.update_health();

        result.map(|()| {
            info!(stats = ?self.stats, "Feed bridge stopped");
            RunOutcome::Completed(self.stats)
        })
    }

    async fn drain(&mut self) -> Result<(), BridgeError> {
        while self.shutdown.is_alive() {
            self.iterate().await?;
        }
        Ok(())
    }

    /// One pass of the loop; returns an error only when the run must end
    async fn iterate(&mut self) -> Result<(), BridgeError> {
        match self.connection.pump(self.config.worker.pump_timeout()).await {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("Broker link error: {}", e.sanitized()),
            Ok(()) => {}
        }
        self.connection.reconnect_if_due().await?;
        self.update_health();

        self.replay_requeued().await;

        if !self.queue.is_empty() {
            match self.queue.get(self.config.worker.dequeue_timeout()).await {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {}
                Err(e) => {
                    self.stats.queue_errors += 1;
                    metrics().queue_read_failed();
                    error!("Unable to read queue: {}", e.sanitized());
                }
            }
        } else if self.queue.is_closed() {
            warn!("Inbound queue closed without a shutdown message");
            self.shutdown.shutdown().await;
        } else {
            tokio::time::sleep(self.config.worker.idle_sleep()).await;
        }

        Ok(())
    }

    async fn process(&mut self, message: Message) {
        self.stats.received += 1;
        metrics().message_received();
        if let Some(health) = &self.health {
            health.mark_message_drained();
        }

        // Control signal, honoured whether or not the broker link is up
        if message.is_shutdown() {
            debug!("Shutdown command handled");
            self.shutdown.shutdown().await;
            return;
        }

        if !self.connection.is_connected() {
            match self.undeliverable.handle(message) {
                Disposition::Dropped => self.stats.dropped += 1,
                Disposition::Requeued { evicted_oldest } => {
                    self.stats.requeued += 1;
                    if evicted_oldest {
                        self.stats.dropped += 1;
                    }
                }
                Disposition::DeadLettered => self.stats.dead_lettered += 1,
            }
            return;
        }

        self.publish(message).await;
    }

    async fn replay_requeued(&mut self) {
        while self.connection.is_connected() {
            let Some(message) = self.undeliverable.next_pending() else {
                break;
            };
            debug!(message_id = %message.message_id, "Replaying requeued message");
            self.publish(message).await;
        }
    }

    async fn publish(&mut self, message: Message) {
        let started = Instant::now();
        let span = publish_span!(message_id = %message.message_id, mode = self.strategy.name());

        async {
            let translation = self
                .strategy
                .translate(&message, &self.config.publish.default_feed);

            for call in translation.calls {
                if let Err(e) = validate_feed_name(&call.feed) {
                    self.stats.publish_failures += 1;
                    error!(feed = %call.feed, "Skipping publish: {}", e);
                    continue;
                }

                match self.connection.publish(&call.feed, call.payload).await {
                    Ok(()) => self.stats.published += 1,
                    Err(e) => {
                        // Calls already issued for this message stand
                        self.stats.publish_failures += 1;
                        error!("Error publishing values: {}", e.sanitized());
                        break;
                    }
                }
            }

            if let Some(e) = translation.error {
                self.stats.translation_errors += 1;
                metrics().translation_failed();
                error!("Error publishing values: {}", e.sanitized());
            }
        }
        .instrument(span)
        .await;

        metrics().message_processed(started.elapsed());
    }

    fn update_health(&self) {
        if let Some(health) = &self.health {
            health.set_broker_connected(self.connection.is_connected());
        }
    }
}
