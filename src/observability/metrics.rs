//! Thread-safe metrics collection system
//!
//! Atomic counters for the queue, publish and broker connection paths, plus a
//! bounded window of per-message processing times.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Keep at most this many processing time samples
const MAX_TIMING_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Queue metrics
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    messages_requeued: AtomicU64,
    messages_dead_lettered: AtomicU64,
    queue_read_errors: AtomicU64,
    translation_errors: AtomicU64,

    // MQTT metrics
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    broker_messages_received: AtomicU64,
    connection_start_time: AtomicU64,

    processing_times: Mutex<Vec<u64>>,

    // Lifecycle metrics
    worker_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_requeued: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            queue_read_errors: AtomicU64::new(0),
            translation_errors: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            broker_messages_received: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            worker_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Queue metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_requeued(&self) {
        self.messages_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_read_failed(&self) {
        self.queue_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn translation_failed(&self) {
        self.translation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_processed(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_disconnected(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.broker_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_worker_state(&self, state: &str) {
        if let Ok(mut current_state) = self.worker_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    pub fn worker_state(&self) -> String {
        self.worker_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_dropped,
            &self.messages_requeued,
            &self.messages_dead_lettered,
            &self.queue_read_errors,
            &self.translation_errors,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.messages_published,
            &self.publish_failures,
            &self.broker_messages_received,
            &self.connection_start_time,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.processing_times.lock() {
            times.clear();
        }
        if let Ok(mut state) = self.worker_state.lock() {
            *state = "initializing".to_string();
        }
    }

    fn calculate_processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    fn calculate_connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.mqtt_connected.load(Ordering::Relaxed) && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_processing_time_ms, p50, p95, p99) = self.calculate_processing_time_statistics();

        MetricsSnapshot {
            queue: QueueMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                messages_requeued: self.messages_requeued.load(Ordering::Relaxed),
                messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
                queue_read_errors: self.queue_read_errors.load(Ordering::Relaxed),
                translation_errors: self.translation_errors.load(Ordering::Relaxed),
                avg_processing_time_ms,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.broker_messages_received.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                current_state: self.worker_state(),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub queue: QueueMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueMetrics {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_requeued: u64,
    pub messages_dead_lettered: u64,
    pub queue_read_errors: u64,
    pub translation_errors: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_metrics() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.message_received();
        collector.message_dropped();
        collector.translation_failed();
        collector.message_processed(Duration::from_millis(40));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.queue.messages_received, 2);
        assert_eq!(metrics.queue.messages_dropped, 1);
        assert_eq!(metrics.queue.translation_errors, 1);
        assert_eq!(metrics.queue.avg_processing_time_ms, 40.0);
    }

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        collector.mqtt_message_published();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.mqtt.connection_attempts, 1);
        assert_eq!(metrics.mqtt.connections_established, 1);
        assert_eq!(metrics.mqtt.messages_published, 1);
        assert!(metrics.mqtt.connected);

        collector.mqtt_connection_lost();
        let metrics = collector.get_metrics();
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.mqtt.connections_lost, 1);
        assert_eq!(metrics.mqtt.connection_duration_seconds, 0);
    }

    #[test]
    fn test_worker_state_transitions() {
        let collector = MetricsCollector::new();
        collector.set_worker_state("running");
        collector.set_worker_state("running");
        collector.set_worker_state("stopped");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.lifecycle.current_state, "stopped");
        assert_eq!(metrics.lifecycle.state_transitions, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.message_received();
                        collector.mqtt_message_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.queue.messages_received, 1000);
        assert_eq!(metrics.mqtt.messages_published, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 95.0) - 9.5).abs() < 0.1);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 0.1);
        assert!((percentile(&data, 100.0) - 10.0).abs() < 0.1);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_processing_time_window_is_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500 {
            collector.message_processed(Duration::from_millis(i));
        }
        assert_eq!(
            collector.processing_times.lock().unwrap().len(),
            MAX_TIMING_SAMPLES
        );
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.mqtt_connection_established();
        collector.set_worker_state("running");

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.queue.messages_received, 0);
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.lifecycle.current_state, "initializing");
    }
}
