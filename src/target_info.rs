//! Persisted record of the current and target installations.
//!
//! Written at the end of every create/update and consumed by rollback. The
//! record may be touched by a concurrently running deployer (for example a
//! rollback triggered by the host while an update is finishing), so writes
//! take an exclusive sibling lock file first.
//!
//! A missing record, or one without a current installation, is a valid empty
//! state and not an error.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use backon::BlockingRetryable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::LOCK_FILE_SUFFIX;
use crate::error::{DeployerError, DeployerResult};
use crate::metrics;
use crate::retry::{LinearBackoffBuilder, record_retry_attempt, record_retry_exhausted};

/// One installation of the node runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationInfo {
    pub code_version: String,
    pub cluster_manifest_version: String,
    pub instance_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_manifest_location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_manifest_location: Option<PathBuf>,
    /// Program that restores this installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_entry_point: Option<PathBuf>,
    #[serde(default)]
    pub undo_arguments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_installation: Option<InstallationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_installation: Option<InstallationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TargetInformation {
    /// Load the record. `Ok(None)` when no record exists.
    pub fn load(path: &Path) -> DeployerResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(json) if json.trim().is_empty() => Ok(Some(Self::default())),
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployerError::io(path, e)),
        }
    }

    /// Whether a current installation with a known code version is recorded.
    pub fn has_current_installation(&self) -> bool {
        self.current_installation
            .as_ref()
            .is_some_and(|c| !c.code_version.trim().is_empty())
    }

    /// Record `target` as the installation being deployed. The previous
    /// target (or, failing that, the previous current) becomes current.
    pub fn advance(self, target: InstallationInfo) -> Self {
        let current = self.target_installation.or(self.current_installation);
        Self {
            current_installation: current,
            target_installation: Some(target),
            updated_at: Some(Utc::now()),
        }
    }

    /// Exchange current and target installations.
    pub fn swapped(self) -> Self {
        Self {
            current_installation: self.target_installation,
            target_installation: self.current_installation,
            updated_at: Some(Utc::now()),
        }
    }

    /// Write the record while holding the sibling lock file.
    ///
    /// Lock acquisition is retried with `policy`; if the lock is still held
    /// afterwards the write fails with [`DeployerError::LockContention`].
    pub fn write_exclusive(&self, path: &Path, policy: LinearBackoffBuilder) -> DeployerResult<()> {
        let _lock = FileLock::acquire(path, policy)?;
        write_staged(path, &serde_json::to_string_pretty(self)?)?;

        debug!(path = %path.display(), "Target information written");
        Ok(())
    }
}

/// Write to a `.tmp` sibling, then rename over `path`.
pub(crate) fn write_staged(path: &Path, contents: &str) -> DeployerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
    }
    let staging = sibling(path, "tmp");
    std::fs::write(&staging, contents).map_err(|e| DeployerError::io(&staging, e))?;
    std::fs::rename(&staging, path).map_err(|e| DeployerError::io(path, e))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Exclusive lock represented by a sibling file; removed on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(target: &Path, policy: LinearBackoffBuilder) -> DeployerResult<Self> {
        let lock_path = sibling(target, LOCK_FILE_SUFFIX);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }

        let mut attempt = 0usize;
        let result = (|| {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
        })
        .retry(policy)
        .sleep(std::thread::sleep)
        .when(|e: &io::Error| e.kind() == io::ErrorKind::AlreadyExists)
        .notify(|_: &io::Error, delay| {
            attempt += 1;
            metrics::LOCK_RETRIES_TOTAL.inc();
            record_retry_attempt("lock", attempt);
            debug!(lock = %lock_path.display(), ?delay, "Lock held, retrying");
        })
        .call();

        match result {
            Ok(_) => Ok(Self { path: lock_path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                record_retry_exhausted("lock");
                Err(DeployerError::LockContention(target.to_path_buf()))
            }
            Err(e) => Err(DeployerError::io(&lock_path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn installation(code: &str) -> InstallationInfo {
        InstallationInfo {
            code_version: code.to_string(),
            cluster_manifest_version: "1.0".to_string(),
            instance_id: 0,
            cluster_manifest_location: None,
            infrastructure_manifest_location: None,
            undo_entry_point: None,
            undo_arguments: vec![],
        }
    }

    fn policy() -> LinearBackoffBuilder {
        LinearBackoffBuilder::new(Duration::from_millis(1), 2)
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TargetInformation::load(&dir.path().join("t.json")).unwrap().is_none());
    }

    #[test]
    fn test_empty_record_has_no_current() {
        let record = TargetInformation {
            current_installation: Some(installation("  ")),
            ..Default::default()
        };
        assert!(!record.has_current_installation());
    }

    #[test]
    fn test_write_exclusive_round_trip_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TargetInformation.json");
        let record = TargetInformation::default().advance(installation("2.0"));
        record.write_exclusive(&path, policy()).unwrap();

        assert_eq!(TargetInformation::load(&path).unwrap().unwrap(), record);
        assert!(!dir.path().join("TargetInformation.json.lock").exists());
    }

    #[test]
    fn test_write_exclusive_fails_when_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TargetInformation.json");
        let _held = FileLock::acquire(&path, policy()).unwrap();

        let err = TargetInformation::default()
            .write_exclusive(&path, policy())
            .unwrap_err();
        assert!(matches!(err, DeployerError::LockContention(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_advance_and_swap() {
        let record = TargetInformation::default()
            .advance(installation("1.0"))
            .advance(installation("2.0"));
        assert_eq!(record.current_installation.as_ref().unwrap().code_version, "1.0");
        assert_eq!(record.target_installation.as_ref().unwrap().code_version, "2.0");

        let swapped = record.swapped();
        assert_eq!(swapped.current_installation.unwrap().code_version, "2.0");
        assert_eq!(swapped.target_installation.unwrap().code_version, "1.0");
    }
}
