//! Health check HTTP server for container orchestration
//!
//! Reports broker link status and queue drain activity of the bridge worker.

use crate::observability::metrics::{current_timestamp, metrics};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// Seconds without a drained message before the queue check reports stale
const QUEUE_STALENESS_THRESHOLD_SECONDS: u64 = 300;

/// HTTP health check server
pub struct HealthServer {
    bridge_id: String,
    port: u16,
    broker_connected: Arc<AtomicBool>,
    last_message_drained: Arc<AtomicU64>,
    additional_checks: Arc<RwLock<HashMap<String, HealthCheck>>>,
}

impl HealthServer {
    pub fn new(bridge_id: String, port: u16) -> Self {
        Self {
            bridge_id,
            port,
            broker_connected: Arc::new(AtomicBool::new(false)),
            last_message_drained: Arc::new(AtomicU64::new(0)),
            additional_checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_last_message_drained(&self, timestamp: u64) {
        self.last_message_drained.store(timestamp, Ordering::Relaxed);
    }

    /// Record that a message was just taken off the inbound queue
    pub fn mark_message_drained(&self) {
        self.set_last_message_drained(current_timestamp());
    }

    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        self.additional_checks.write().await.insert(name, check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// Start the HTTP health server; runs until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - status with individual checks
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - metrics snapshot
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()))
        });

        // GET /ready - ready once the broker link is up
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.broker_connected.load(Ordering::Relaxed);
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live
        let live_route = warp::path("live").and(warp::get()).and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        let routes = health_route.or(metrics_route).or(ready_route).or(live_route);

        tracing::info!("Starting health server on port {}", self.port);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;

        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("broker".to_string(), self.check_broker_health());
        checks.insert("queue_drain".to_string(), self.check_queue_drain_health());

        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let status = if checks.values().all(|check| check.status == "healthy") {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: current_timestamp(),
            bridge_id: self.bridge_id.clone(),
            worker_state: metrics().worker_state(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    fn check_broker_health(&self) -> HealthCheck {
        if self.broker_connected.load(Ordering::Relaxed) {
            HealthCheck::new("healthy", "Broker connection established")
        } else {
            HealthCheck::new("unhealthy", "Broker disconnected")
        }
    }

    fn check_queue_drain_health(&self) -> HealthCheck {
        let now = current_timestamp();
        let last = self.last_message_drained.load(Ordering::Relaxed);

        if last == 0 {
            HealthCheck::new("healthy", "No messages drained yet")
        } else if now.saturating_sub(last) > QUEUE_STALENESS_THRESHOLD_SECONDS {
            HealthCheck::new(
                "stale",
                format!("No queue activity for {} seconds", now - last),
            )
        } else {
            HealthCheck::new("healthy", "Recent queue activity")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn new(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    bridge_id: String,
    worker_state: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}
