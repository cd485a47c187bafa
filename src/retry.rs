//! Retry policies used by the deployer.
//!
//! | Policy | Delay | Attempts | Use Case |
//! |--------|-------|----------|----------|
//! | [`lock_policy`] | linear, `n * base` | configured | exclusive record writes |
//! | [`reachability_policy`] | constant interval | until the time budget | package source probes |
//!
//! Lock retries back off linearly rather than exponentially: contention on the
//! target information record comes from a sibling deployer on the same host,
//! which finishes its write within a few hundred milliseconds.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use backon::BlockingRetryable;
//! use nodeconf::retry::LinearBackoffBuilder;
//!
//! let result = (|| std::fs::read_to_string("/tmp/record.json"))
//!     .retry(LinearBackoffBuilder::new(Duration::from_millis(50), 3))
//!     .sleep(std::thread::sleep)
//!     .when(|e| e.kind() == std::io::ErrorKind::WouldBlock)
//!     .call();
//! ```

use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};

use crate::config::DeployerConfig;
use crate::metrics;

/// Builds a [`LinearBackoff`]: retry `n` waits `n * base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoffBuilder {
    base: Duration,
    max_times: usize,
}

impl LinearBackoffBuilder {
    /// `max_times` is the number of retries after the first attempt.
    pub fn new(base: Duration, max_times: usize) -> Self {
        Self { base, max_times }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_times(&self) -> usize {
        self.max_times
    }
}

impl BackoffBuilder for LinearBackoffBuilder {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            base: self.base,
            max_times: self.max_times,
            attempt: 0,
        }
    }
}

/// Delay sequence `base, 2*base, 3*base, ...` of bounded length.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_times: usize,
    attempt: usize,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_times {
            return None;
        }
        self.attempt += 1;
        let factor = u32::try_from(self.attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

/// Policy for exclusive acquisition of persisted records.
///
/// `lock_retry_count` counts total attempts, so the policy allows one retry less.
pub fn lock_policy(config: &DeployerConfig) -> LinearBackoffBuilder {
    LinearBackoffBuilder::new(
        config.lock_retry_base_delay,
        config.lock_retry_count.saturating_sub(1),
    )
}

/// Policy for reachability probes.
///
/// The attempt count is effectively unbounded; callers cap the loop with the
/// configured time budget instead.
pub fn reachability_policy(interval: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(interval)
        .with_max_times(usize::MAX)
}

/// Record a retry attempt for metrics.
pub fn record_retry_attempt(policy_name: &str, attempt: usize) {
    metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy_name, "attempt"])
        .inc();
    tracing::debug!(policy = policy_name, attempt, "Retry attempt");
}

/// Record a retry exhaustion (all attempts failed).
pub fn record_retry_exhausted(policy_name: &str) {
    metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy_name, "exhausted"])
        .inc();
    tracing::warn!(policy = policy_name, "Retry policy exhausted");
}
