//! Cooperative shutdown of the queue drain worker

use crate::observability::metrics::metrics;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle of the worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Running => "running",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// Owns the worker's alive flag
///
/// The first [`shutdown`](Self::shutdown) call clears the flag, waits the
/// grace period and marks the worker stopped; later calls return at once.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: watch::Sender<WorkerState>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(WorkerState::Running);
        Self { state, grace }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// The loop keeps iterating while this is true
    pub fn is_alive(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Watch state changes, e.g. to wait for the worker to stop
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Request shutdown; returns false if shutdown had already been requested
    pub async fn shutdown(&self) -> bool {
        let began = self.state.send_if_modified(|state| {
            if *state == WorkerState::Running {
                *state = WorkerState::ShuttingDown;
                true
            } else {
                false
            }
        });

        if !began {
            debug!("Shutdown already requested");
            return false;
        }

        info!(grace_ms = self.grace.as_millis() as u64, "Shutting down");
        metrics().set_worker_state(WorkerState::ShuttingDown.as_str());

        tokio::time::sleep(self.grace).await;

        self.state.send_replace(WorkerState::Stopped);
        metrics().set_worker_state(WorkerState::Stopped.as_str());
        true
    }
}
