//! Host environment, host service and logical directories.

use std::path::PathBuf;

use tracing::{debug, info};

use super::{Deployer, OperationOutcome, platform_call};
use crate::config::DeployerConfig;
use crate::constants::{
    ENV_KEY_FABRIC_BIN_ROOT, ENV_KEY_FABRIC_CODE_PATH, ENV_KEY_FABRIC_DATA_ROOT,
    ENV_KEY_FABRIC_LOG_ROOT, ENV_KEY_FABRIC_ROOT, FABRIC_BIN_RELATIVE_PATH,
    FABRIC_CODE_RELATIVE_PATH, HOST_BINARY_NAME, PARAM_RUN_AS_ACCOUNT_NAME,
    PARAM_RUN_AS_ACCOUNT_TYPE, PARAM_RUN_AS_PASSWORD, SECTION_LOGICAL_DIRECTORIES, SECTION_RUN_AS,
};
use crate::error::{DeployerError, DeployerResult};
use crate::manifest::ClusterManifest;
use crate::platform::{Platform, ServiceCredentials, ServiceSpec, StartType, capability};

/// Environment keys the node runtime reads at startup.
pub(crate) fn environment_entries(config: &DeployerConfig) -> Vec<(&'static str, String)> {
    let path = |p: PathBuf| p.display().to_string();
    vec![
        (ENV_KEY_FABRIC_ROOT, path(config.fabric_root.clone())),
        (
            ENV_KEY_FABRIC_BIN_ROOT,
            path(config.fabric_root.join(FABRIC_BIN_RELATIVE_PATH)),
        ),
        (
            ENV_KEY_FABRIC_CODE_PATH,
            path(config.fabric_root.join(FABRIC_CODE_RELATIVE_PATH)),
        ),
        (ENV_KEY_FABRIC_DATA_ROOT, path(config.data_root.clone())),
        (ENV_KEY_FABRIC_LOG_ROOT, path(config.log_root.clone())),
    ]
}

pub(crate) fn configure_environment(
    platform: &dyn Platform,
    config: &DeployerConfig,
) -> DeployerResult<()> {
    for (key, value) in environment_entries(config) {
        platform_call(capability::ENVIRONMENT, || {
            platform.set_environment_value(key, &value)
        })?;
    }
    debug!("Host environment configured");
    Ok(())
}

/// Host service definition; the account comes from the manifest's `RunAs`
/// section when it names one.
pub(crate) fn service_spec(config: &DeployerConfig, manifest: Option<&ClusterManifest>) -> ServiceSpec {
    let credentials = manifest.and_then(|m| {
        let account_name = m.parameter(SECTION_RUN_AS, PARAM_RUN_AS_ACCOUNT_NAME)?.trim();
        if account_name.is_empty() {
            return None;
        }
        Some(ServiceCredentials {
            account_name: account_name.to_string(),
            account_type: m
                .parameter(SECTION_RUN_AS, PARAM_RUN_AS_ACCOUNT_TYPE)
                .unwrap_or_default()
                .to_string(),
            password: m
                .parameter(SECTION_RUN_AS, PARAM_RUN_AS_PASSWORD)
                .map(str::to_string),
        })
    });

    ServiceSpec {
        name: config.service_name.clone(),
        binary_path: config
            .fabric_root
            .join(FABRIC_BIN_RELATIVE_PATH)
            .join(HOST_BINARY_NAME),
        start_type: StartType::Automatic,
        credentials,
    }
}

pub(crate) fn install_service(
    platform: &dyn Platform,
    config: &DeployerConfig,
    manifest: Option<&ClusterManifest>,
) -> DeployerResult<()> {
    let spec = service_spec(config, manifest);
    platform_call(capability::SERVICE, || platform.install_or_update_service(&spec))?;
    info!(service = %spec.name, "Host service configured");
    Ok(())
}

/// Every value of the `LogicalDirectories` section.
pub(crate) fn logical_directories(manifest: &ClusterManifest) -> Vec<PathBuf> {
    manifest
        .section(SECTION_LOGICAL_DIRECTORIES)
        .map(|section| {
            section
                .parameters
                .iter()
                .map(|p| p.value.trim())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn configure(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let config = &deployer.params.config;
    let manifest = deployer.params.optional_cluster_manifest()?;

    for dir in [&config.data_root, &config.log_root] {
        std::fs::create_dir_all(dir).map_err(|e| DeployerError::io(dir, e))?;
    }
    configure_environment(deployer.platform, config)?;
    install_service(deployer.platform, config, manifest.as_ref())?;

    if let Some(manifest) = &manifest {
        for dir in logical_directories(manifest) {
            std::fs::create_dir_all(&dir).map_err(|e| DeployerError::io(&dir, e))?;
            debug!(dir = %dir.display(), "Logical directory created");
        }
    }
    Ok(OperationOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_entries() {
        let config = DeployerConfig {
            fabric_root: PathBuf::from("/opt/nodeconf"),
            ..Default::default()
        };
        let entries = environment_entries(&config);
        assert_eq!(entries.len(), 5);
        assert!(entries.contains(&(
            ENV_KEY_FABRIC_CODE_PATH,
            "/opt/nodeconf/bin/Fabric/Fabric.Code".to_string()
        )));
    }

    #[test]
    fn test_service_spec_without_run_as() {
        let spec = service_spec(&DeployerConfig::default(), None);
        assert_eq!(spec.binary_path, PathBuf::from("/opt/nodeconf/bin/FabricHost"));
        assert!(spec.credentials.is_none());
    }
}
