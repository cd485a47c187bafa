//! Prometheus metrics for deployer runs.
//!
//! The deployer is a one-shot process, so metrics are not scraped over HTTP.
//! Instead the binary renders the registry with [`gather_text`] and writes it
//! to a file picked up by a textfile collector (`--metrics-file`).
//!
//! All metrics live in a custom registry prefixed with `nodeconf` so that
//! embedding the library never collides with the host application's default
//! registry. Registration failures are logged and the unregistered metric is
//! returned, so recording never panics.

use std::time::Instant;

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom registry for deployer metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("nodeconf".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Operation metrics
// =============================================================================

define_counter_vec!(
    OPERATIONS_TOTAL,
    "operations_total",
    "Deployment operations run, by operation and outcome",
    ["operation", "outcome"]
);
define_histogram_vec!(
    OPERATION_DURATION,
    "operation_duration_seconds",
    "Wall-clock duration of deployment operations",
    ["operation"],
    [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
);

// =============================================================================
// Retry and reachability metrics
// =============================================================================

define_counter!(
    LOCK_RETRIES_TOTAL,
    "lock_retries_total",
    "Retries spent acquiring persisted records exclusively"
);
define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retry policy events, by policy and event",
    ["policy", "event"]
);
define_counter_vec!(
    REACHABILITY_ATTEMPTS,
    "reachability_attempts_total",
    "Reachability probe attempts, by outcome",
    ["outcome"]
);

// =============================================================================
// Platform metrics
// =============================================================================

define_counter_vec!(
    PLATFORM_CALLS,
    "platform_calls_total",
    "Calls into host platform capabilities, by capability and outcome",
    ["capability", "outcome"]
);

// =============================================================================
// Safe registration helpers
// =============================================================================

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounter, using unregistered fallback");
    }
    counter
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounterVec, using unregistered fallback");
    }
    counter
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register HistogramVec, using unregistered fallback");
    }
    histogram
}

/// Forces registration of every metric so a run that never touched one
/// still exports it with a zero value.
pub fn init_metrics() {
    let _ = &*OPERATIONS_TOTAL;
    let _ = &*OPERATION_DURATION;
    let _ = &*LOCK_RETRIES_TOTAL;
    let _ = &*RETRY_ATTEMPTS;
    let _ = &*REACHABILITY_ATTEMPTS;
    let _ = &*PLATFORM_CALLS;
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Records the outcome and duration of a deployment operation.
pub fn record_operation(operation: &str, success: bool, started: Instant) {
    let outcome = if success { "success" } else { "failure" };
    OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
}

/// Records a platform capability call.
pub fn record_platform_call(capability: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PLATFORM_CALLS
        .with_label_values(&[capability, outcome])
        .inc();
}

/// Records a single reachability probe.
pub fn record_reachability_attempt(outcome: &str) {
    REACHABILITY_ATTEMPTS.with_label_values(&[outcome]).inc();
}
