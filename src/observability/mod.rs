//! Observability for the bridge
//!
//! Structured logging, process wide metrics and the optional health endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthServer};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{mqtt_span, publish_span, worker_span};
