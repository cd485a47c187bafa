//! File layout under the data root and the per-node package record.
//!
//! ```text
//! <data_root>/
//!   HostSettings.json
//!   SeedInfo.ini
//!   InfrastructureManifest.json
//!   Endpoints.csv
//!   Fabric/Fabric.Data/InfrastructureManifest.json
//!   <node>/Fabric/
//!     ClusterManifest.current.json
//!     ClusterManifest.<manifestVersion>.json
//!     Fabric.Package.current.json
//!     Fabric.Package.<configVersion>.json
//!     Fabric.Config.<configVersion>/Settings.json
//!     work/UnreliableTransportSettings.ini
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CLUSTER_MANIFEST_CURRENT_FILE, CLUSTER_MANIFEST_FILE_PREFIX, CONFIG_DIR_PREFIX,
    ENDPOINTS_FILE, FABRIC_DATA_DIR, HOST_SETTINGS_FILE, INFRASTRUCTURE_MANIFEST_FILE,
    NODE_FABRIC_DIR, PACKAGE_CURRENT_FILE, PACKAGE_FILE_PREFIX, SEED_INFO_FILE, SEED_INFO_HEADER,
    SEED_NODE_VOTE_TYPE, SETTINGS_FILE, UNRELIABLE_TRANSPORT_FILE,
};
use crate::error::{DeployerError, DeployerResult};
use crate::retry::LinearBackoffBuilder;
use crate::settings::{SettingsSection, work_dir};
use crate::target_info::{FileLock, write_staged};
use crate::versions::Versions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLayout {
    data_root: PathBuf,
}

impl DeploymentLayout {
    pub fn new(data_root: &Path) -> Self {
        Self {
            data_root: data_root.to_path_buf(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn host_settings(&self) -> PathBuf {
        self.data_root.join(HOST_SETTINGS_FILE)
    }

    pub fn seed_info(&self) -> PathBuf {
        self.data_root.join(SEED_INFO_FILE)
    }

    pub fn inventory(&self) -> PathBuf {
        self.data_root.join(INFRASTRUCTURE_MANIFEST_FILE)
    }

    /// Inventory copy read by the node runtime.
    pub fn runtime_inventory(&self) -> PathBuf {
        self.data_root
            .join(NODE_FABRIC_DIR)
            .join(FABRIC_DATA_DIR)
            .join(INFRASTRUCTURE_MANIFEST_FILE)
    }

    pub fn endpoints(&self) -> PathBuf {
        self.data_root.join(ENDPOINTS_FILE)
    }

    pub fn node_root(&self, node: &str) -> PathBuf {
        self.data_root.join(node)
    }

    pub fn node_fabric_dir(&self, node: &str) -> PathBuf {
        self.node_root(node).join(NODE_FABRIC_DIR)
    }

    pub fn config_dir(&self, node: &str, config_version: &str) -> PathBuf {
        self.node_fabric_dir(node)
            .join(format!("{CONFIG_DIR_PREFIX}.{config_version}"))
    }

    pub fn node_settings(&self, node: &str, config_version: &str) -> PathBuf {
        self.config_dir(node, config_version).join(SETTINGS_FILE)
    }

    pub fn current_cluster_manifest(&self, node: &str) -> PathBuf {
        self.node_fabric_dir(node).join(CLUSTER_MANIFEST_CURRENT_FILE)
    }

    pub fn versioned_cluster_manifest(&self, node: &str, manifest_version: &str) -> PathBuf {
        self.node_fabric_dir(node)
            .join(format!("{CLUSTER_MANIFEST_FILE_PREFIX}.{manifest_version}.json"))
    }

    pub fn current_package(&self, node: &str) -> PathBuf {
        self.node_fabric_dir(node).join(PACKAGE_CURRENT_FILE)
    }

    pub fn versioned_package(&self, node: &str, config_version: &str) -> PathBuf {
        self.node_fabric_dir(node)
            .join(format!("{PACKAGE_FILE_PREFIX}.{config_version}.json"))
    }

    pub fn unreliable_transport(&self, node: &str) -> PathBuf {
        work_dir(&self.data_root, node).join(UNRELIABLE_TRANSPORT_FILE)
    }

    /// Nodes that have a configuration under the data root, sorted by name.
    pub fn configured_nodes(&self) -> DeployerResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.data_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeployerError::io(&self.data_root, e)),
        };
        let mut nodes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeployerError::io(&self.data_root, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name != NODE_FABRIC_DIR && self.current_package(&name).is_file() {
                nodes.push(name);
            }
        }
        nodes.sort();
        Ok(nodes)
    }
}

/// Versions a node's configuration was last written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub code_version: String,
    pub cluster_manifest_version: String,
    pub instance_id: u64,
    pub config_version: String,
    pub deployed_at: DateTime<Utc>,
}

impl PackageRecord {
    pub fn new(code_version: &str, versions: &Versions) -> Self {
        Self {
            code_version: code_version.to_string(),
            cluster_manifest_version: versions.cluster_manifest_version.clone(),
            instance_id: versions.instance_id,
            config_version: versions.config_version.clone(),
            deployed_at: Utc::now(),
        }
    }

    /// `Ok(None)` when the node has no record yet.
    pub fn load(path: &Path) -> DeployerResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployerError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> DeployerResult<()> {
        write_file(path, &serde_json::to_string_pretty(self)?)
    }

    /// Replace the record while holding its lock file.
    pub fn save_exclusive(&self, path: &Path, policy: LinearBackoffBuilder) -> DeployerResult<()> {
        let _lock = FileLock::acquire(path, policy)?;
        write_staged(path, &serde_json::to_string_pretty(self)?)
    }
}

/// `[SeedNodes]` followed by `name=address:port` for every seed node vote.
pub fn render_seed_info(votes: &SettingsSection) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{SEED_INFO_HEADER}");
    for vote in votes.parameters() {
        if let Some((vote_type, address)) = vote.value.split_once(',') {
            if vote_type.trim().eq_ignore_ascii_case(SEED_NODE_VOTE_TYPE) {
                let _ = writeln!(out, "{}={}", vote.name, address.trim());
            }
        }
    }
    out
}

/// Write `contents`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &str) -> DeployerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| DeployerError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = DeploymentLayout::new(Path::new("/data"));
        assert_eq!(
            layout.node_settings("N0", "1.0.3"),
            PathBuf::from("/data/N0/Fabric/Fabric.Config.1.0.3/Settings.json")
        );
        assert_eq!(
            layout.versioned_cluster_manifest("N0", "2.1"),
            PathBuf::from("/data/N0/Fabric/ClusterManifest.2.1.json")
        );
        assert_eq!(
            layout.unreliable_transport("N0"),
            PathBuf::from("/data/N0/Fabric/work/UnreliableTransportSettings.ini")
        );
        assert_eq!(
            layout.runtime_inventory(),
            PathBuf::from("/data/Fabric/Fabric.Data/InfrastructureManifest.json")
        );
    }

    #[test]
    fn test_seed_info_skips_other_votes() {
        let votes = SettingsSection::from_pairs(
            "Votes",
            [
                ("N0", "SeedNode,10.0.0.1:19001"),
                ("Sql", "SQL,Server=db"),
            ],
        );
        assert_eq!(render_seed_info(&votes), "[SeedNodes]\nN0=10.0.0.1:19001\n");
    }

    #[test]
    fn test_package_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("N0/Fabric/Fabric.Package.current.json");
        assert!(PackageRecord::load(&path).unwrap().is_none());
        let record = PackageRecord::new("6.0", &Versions::with_instance_id("1.0", 2, "6.0"));
        record.save(&path).unwrap();
        assert_eq!(PackageRecord::load(&path).unwrap().unwrap(), record);
    }

    #[test]
    fn test_package_record_save_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("N0/Fabric/Fabric.Package.current.json");
        let policy = LinearBackoffBuilder::new(std::time::Duration::from_millis(1), 1);
        let record = PackageRecord::new("6.0", &Versions::with_instance_id("1.0", 2, "6.0"));

        let held = FileLock::acquire(&path, policy).unwrap();
        assert!(matches!(
            record.save_exclusive(&path, policy),
            Err(DeployerError::LockContention(_))
        ));
        assert!(!path.exists());

        drop(held);
        record.save_exclusive(&path, policy).unwrap();
        assert_eq!(PackageRecord::load(&path).unwrap().unwrap(), record);
        assert!(!path.with_file_name("Fabric.Package.current.json.tmp").exists());
    }

    #[test]
    fn test_configured_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DeploymentLayout::new(dir.path());
        let record = PackageRecord::new("6.0", &Versions::with_instance_id("1.0", 0, "6.0"));
        record.save(&layout.current_package("N1")).unwrap();
        record.save(&layout.current_package("N0")).unwrap();
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();
        assert_eq!(layout.configured_nodes().unwrap(), vec!["N0", "N1"]);
    }
}
