//! Prometheus metrics for the dispatcher
//!
//! This module provides metrics tracking for:
//! - Worker pool: free/busy/unhealthy gauges, queue depth, in-flight requests
//! - Admission: accepted and rejected requests
//! - Delivery: terminal outcomes, retries, transient failures, round-trip latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::dispatcher::registry::RegistryStats;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all dispatcher metrics
struct DispatchMetrics {
    workers: GaugeVec,
    queue_depth: Gauge,
    in_flight: Gauge,
    requests_accepted: Counter,
    requests_rejected: Counter,
    requests_completed: CounterVec,
    retries: Counter,
    delivery_failures: CounterVec,
    delivery_duration: HistogramVec,
}

/// Global storage for dispatcher metrics (`None` if registration failed)
static DISPATCH_METRICS: OnceLock<Option<DispatchMetrics>> = OnceLock::new();

fn metrics() -> Option<&'static DispatchMetrics> {
    DISPATCH_METRICS.get().and_then(Option::as_ref)
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup; later calls
/// are no-ops. If metric registration fails, the error is returned and
/// subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = jobgate::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let mut failure = None;

    DISPATCH_METRICS.get_or_init(|| match register_metrics() {
        Ok(metrics) => {
            tracing::info!("Prometheus metrics initialized successfully");
            Some(metrics)
        }
        Err(e) => {
            failure = Some(e);
            None
        }
    });

    match failure {
        Some(e) => Err(Box::new(e)),
        None => Ok(()),
    }
}

fn register_metrics() -> Result<DispatchMetrics, prometheus::Error> {
    Ok(DispatchMetrics {
        workers: register_gauge_vec!(
            "jobgate_workers",
            "Number of workers by status",
            &["status"]
        )?,
        queue_depth: register_gauge!(
            "jobgate_queue_depth",
            "Requests waiting in the pending queue"
        )?,
        in_flight: register_gauge!(
            "jobgate_in_flight_requests",
            "Requests currently assigned to a worker"
        )?,
        requests_accepted: register_counter!(
            "jobgate_requests_accepted_total",
            "Total requests accepted by the admission endpoint"
        )?,
        requests_rejected: register_counter!(
            "jobgate_requests_rejected_total",
            "Total requests rejected because the queue was full"
        )?,
        requests_completed: register_counter_vec!(
            "jobgate_requests_completed_total",
            "Total requests that reached a terminal outcome",
            &["outcome"]
        )?,
        retries: register_counter!(
            "jobgate_request_retries_total",
            "Total delivery retries after transient failures"
        )?,
        delivery_failures: register_counter_vec!(
            "jobgate_delivery_failures_total",
            "Total transient delivery failures by kind",
            &["kind"]
        )?,
        delivery_duration: register_histogram_vec!(
            "jobgate_delivery_duration_seconds",
            "Worker round-trip duration in seconds",
            &["outcome"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
    })
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    metrics().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update pool gauges after a dispatcher state change
pub fn update_pool_metrics(stats: &RegistryStats, queue_len: usize, in_flight: usize) {
    let Some(m) = metrics() else {
        return;
    };

    m.workers.with_label_values(&["free"]).set(stats.free as f64);
    m.workers.with_label_values(&["busy"]).set(stats.busy as f64);
    m.workers
        .with_label_values(&["unhealthy"])
        .set(stats.unhealthy as f64);
    m.queue_depth.set(queue_len as f64);
    m.in_flight.set(in_flight as f64);
}

/// Record an accepted request
pub fn record_accepted() {
    if let Some(m) = metrics() {
        m.requests_accepted.inc();
    }
}

/// Record a request rejected for capacity
pub fn record_rejected() {
    if let Some(m) = metrics() {
        m.requests_rejected.inc();
    }
}

/// Record a terminal outcome
pub fn record_completed(outcome: &str) {
    if let Some(m) = metrics() {
        m.requests_completed.with_label_values(&[outcome]).inc();
    }
}

/// Record a retry after a transient failure
pub fn record_retry() {
    if let Some(m) = metrics() {
        m.retries.inc();
    }
}

/// Record one delivery attempt
pub fn record_delivery(outcome: &str, duration_secs: f64, transient: bool) {
    let Some(m) = metrics() else {
        return;
    };

    m.delivery_duration
        .with_label_values(&[outcome])
        .observe(duration_secs);

    if transient {
        m.delivery_failures.with_label_values(&[outcome]).inc();
    }
}
