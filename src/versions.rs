//! Version stamping for node configurations.
//!
//! A node configuration is identified by the cluster manifest version plus an
//! instance id. The instance id survives upgrades that stay within the same
//! code generation, which lets the host recognize an unchanged configuration
//! and skip a redundant restart.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_INSTANCE_ID;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    pub cluster_manifest_version: String,
    pub instance_id: u64,
    /// `{code}:{manifest}:{instance}`
    pub fabric_instance_version: String,
    /// `{manifest}.{instance}`
    pub config_version: String,
}

impl Versions {
    /// Compute versions for a deployment.
    ///
    /// The prior instance id is kept when `target_code_version` starts with
    /// `current_code_version` (ASCII case-insensitive); otherwise it resets
    /// to [`DEFAULT_INSTANCE_ID`].
    pub fn compute(
        manifest_version: &str,
        prior_instance_id: u64,
        target_code_version: &str,
        current_code_version: &str,
    ) -> Self {
        let instance_id = if starts_with_ignore_ascii_case(target_code_version, current_code_version)
        {
            prior_instance_id
        } else {
            DEFAULT_INSTANCE_ID
        };
        Self::with_instance_id(manifest_version, instance_id, target_code_version)
    }

    /// Versions for an explicitly chosen instance id.
    pub fn with_instance_id(manifest_version: &str, instance_id: u64, code_version: &str) -> Self {
        Self {
            cluster_manifest_version: manifest_version.to_string(),
            instance_id,
            fabric_instance_version: format!("{code_version}:{manifest_version}:{instance_id}"),
            config_version: format!("{manifest_version}.{instance_id}"),
        }
    }
}

fn starts_with_ignore_ascii_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_carries_over_within_generation() {
        let versions = Versions::compute("3.0", 7, "1.2.3.0_extra", "1.2.3.0");
        assert_eq!(versions.instance_id, 7);
        assert_eq!(versions.config_version, "3.0.7");
        assert_eq!(versions.fabric_instance_version, "1.2.3.0_extra:3.0:7");
    }

    #[test]
    fn test_instance_id_resets_on_new_generation() {
        let versions = Versions::compute("3.0", 7, "2.0.0.0", "1.2.3.0");
        assert_eq!(versions.instance_id, DEFAULT_INSTANCE_ID);
        assert_eq!(versions.config_version, "3.0.0");
    }

    #[test]
    fn test_prefix_comparison_ignores_ascii_case() {
        let versions = Versions::compute("1", 4, "1.0.RC", "1.0.rc");
        assert_eq!(versions.instance_id, 4);
    }

    #[test]
    fn test_shorter_target_resets() {
        let versions = Versions::compute("1", 4, "1.0", "1.0.1");
        assert_eq!(versions.instance_id, DEFAULT_INSTANCE_ID);
    }

    #[test]
    fn test_empty_current_version_keeps_instance() {
        let versions = Versions::compute("1", 9, "5.0", "");
        assert_eq!(versions.instance_id, 9);
    }
}
