//! Process-level configuration for the deployer.
//!
//! [`DeployerConfig`] holds the host-specific settings that are the same for
//! every invocation on a machine (roots, retry tuning, names of host objects).
//! Per-invocation inputs such as the manifest path live in
//! [`DeploymentParameters`](crate::operations::DeploymentParameters).
//!
//! ```rust,no_run
//! use nodeconf::config::DeployerConfig;
//!
//! let config = DeployerConfig::from_env().expect("invalid environment");
//! if let Err(errors) = config.validate() {
//!     for error in errors {
//!         eprintln!("{error}");
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_FIREWALL_RULE_PREFIX, DEFAULT_LOCK_RETRY_BASE_DELAY_MS, DEFAULT_LOCK_RETRY_COUNT,
    DEFAULT_REACHABILITY_INTERVAL_MS, DEFAULT_REACHABILITY_TIMEOUT_SECS, DEFAULT_SERVICE_NAME,
    TARGET_INFORMATION_FILE,
};
use crate::error::{DeployerError, DeployerResult};

/// Host-level deployer configuration.
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    /// Root of all per-node data written by the deployer.
    pub data_root: PathBuf,

    /// Root for runtime logs; created but never written by the deployer.
    pub log_root: PathBuf,

    /// Installation root of the node runtime binaries.
    pub fabric_root: PathBuf,

    /// Location of the persisted target information record.
    /// `None` means `<data_root>/TargetInformation.json`.
    pub target_info_path: Option<PathBuf>,

    /// Attempts to acquire the target information record exclusively.
    pub lock_retry_count: usize,

    /// Attempt `n` waits `n * lock_retry_base_delay` before retrying.
    pub lock_retry_base_delay: Duration,

    /// Overall budget for a package source to become reachable.
    pub reachability_timeout: Duration,

    /// Pause between reachability attempts.
    pub reachability_interval: Duration,

    /// Name of the host service running the node runtime.
    pub service_name: String,

    /// Prefix of every firewall rule the deployer owns.
    pub firewall_rule_prefix: String,

    /// Keep the data root on `Remove`.
    pub skip_delete_data_root: bool,

    /// JSON file standing in for the machine-wide environment registry.
    pub environment_file: PathBuf,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/nodeconf/data"),
            log_root: PathBuf::from("/var/log/nodeconf"),
            fabric_root: PathBuf::from("/opt/nodeconf"),
            target_info_path: None,
            lock_retry_count: DEFAULT_LOCK_RETRY_COUNT,
            lock_retry_base_delay: Duration::from_millis(DEFAULT_LOCK_RETRY_BASE_DELAY_MS),
            reachability_timeout: Duration::from_secs(DEFAULT_REACHABILITY_TIMEOUT_SECS),
            reachability_interval: Duration::from_millis(DEFAULT_REACHABILITY_INTERVAL_MS),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            firewall_rule_prefix: DEFAULT_FIREWALL_RULE_PREFIX.to_string(),
            skip_delete_data_root: false,
            environment_file: PathBuf::from("/etc/nodeconf/environment.json"),
        }
    }
}

impl DeployerConfig {
    /// Effective path of the target information record.
    pub fn target_info_path(&self) -> PathBuf {
        self.target_info_path
            .clone()
            .unwrap_or_else(|| self.data_root.join(TARGET_INFORMATION_FILE))
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.data_root.is_absolute() {
            errors.push(format!(
                "data_root ({}) must be an absolute path",
                self.data_root.display()
            ));
        }

        if !self.log_root.is_absolute() {
            errors.push(format!(
                "log_root ({}) must be an absolute path",
                self.log_root.display()
            ));
        }

        if self.data_root == PathBuf::from("/") {
            errors.push("data_root must not be the filesystem root".to_string());
        }

        if self.lock_retry_count == 0 {
            errors.push("lock_retry_count must be at least 1".to_string());
        }

        if self.reachability_interval.is_zero() {
            errors.push("reachability_interval must be greater than 0".to_string());
        }

        if self.reachability_interval > self.reachability_timeout {
            errors.push(format!(
                "reachability_interval ({:?}) must not exceed reachability_timeout ({:?})",
                self.reachability_interval, self.reachability_timeout
            ));
        }

        if self.service_name.trim().is_empty() {
            errors.push("service_name must not be empty".to_string());
        }

        if self.firewall_rule_prefix.trim().is_empty() {
            errors.push("firewall_rule_prefix must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// - `NODECONF_DATA_ROOT`, `NODECONF_LOG_ROOT`, `NODECONF_FABRIC_ROOT`: roots
    /// - `NODECONF_TARGET_INFO_PATH`: target information record
    /// - `NODECONF_LOCK_RETRY_COUNT`, `NODECONF_LOCK_RETRY_BASE_DELAY_MS`
    /// - `NODECONF_REACHABILITY_TIMEOUT_SECS`, `NODECONF_REACHABILITY_INTERVAL_MS`
    /// - `NODECONF_SERVICE_NAME`, `NODECONF_FIREWALL_RULE_PREFIX`
    /// - `NODECONF_SKIP_DELETE_DATA_ROOT`: `true`/`1` to keep the data root
    /// - `NODECONF_ENVIRONMENT_FILE`: environment registry file
    ///
    /// Unparseable tuning values fall back to their defaults. A retry count of
    /// zero is rejected since it would make every locked write fail.
    pub fn from_env() -> DeployerResult<Self> {
        let defaults = Self::default();

        let path_var = |name: &str, default: PathBuf| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        let data_root = path_var("NODECONF_DATA_ROOT", defaults.data_root);
        let log_root = path_var("NODECONF_LOG_ROOT", defaults.log_root);
        let fabric_root = path_var("NODECONF_FABRIC_ROOT", defaults.fabric_root);
        let environment_file = path_var("NODECONF_ENVIRONMENT_FILE", defaults.environment_file);

        let target_info_path = std::env::var("NODECONF_TARGET_INFO_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let lock_retry_count: usize = std::env::var("NODECONF_LOCK_RETRY_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.lock_retry_count);

        if lock_retry_count == 0 {
            return Err(DeployerError::Config(
                "NODECONF_LOCK_RETRY_COUNT must be at least 1".to_string(),
            ));
        }

        let lock_retry_base_delay = std::env::var("NODECONF_LOCK_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_retry_base_delay);

        let reachability_timeout = std::env::var("NODECONF_REACHABILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.reachability_timeout);

        let reachability_interval = std::env::var("NODECONF_REACHABILITY_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reachability_interval);

        let service_name =
            std::env::var("NODECONF_SERVICE_NAME").unwrap_or(defaults.service_name);
        let firewall_rule_prefix =
            std::env::var("NODECONF_FIREWALL_RULE_PREFIX").unwrap_or(defaults.firewall_rule_prefix);

        let skip_delete_data_root = std::env::var("NODECONF_SKIP_DELETE_DATA_ROOT")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(defaults.skip_delete_data_root);

        Ok(Self {
            data_root,
            log_root,
            fabric_root,
            target_info_path,
            lock_retry_count,
            lock_retry_base_delay,
            reachability_timeout,
            reachability_interval,
            service_name,
            firewall_rule_prefix,
            skip_delete_data_root,
            environment_file,
        })
    }
}
