//! Node removal.
//!
//! `Remove` undoes everything the deployer set up on the machine. Each step
//! runs even if an earlier one failed; the first failure is returned at the
//! end.

use std::path::Path;

use tracing::{debug, info, warn};

use super::configure::{environment_entries, logical_directories};
use super::network::network_name;
use super::{Deployer, OperationOutcome, cluster_spn, platform_call, resolve};
use crate::error::{DeployerError, DeployerResult};
use crate::platform::{NetworkKind, capability};
use crate::settings::local_nodes;

/// Keeps the first error while letting later steps run.
#[derive(Default)]
struct FirstError(Option<DeployerError>);

impl FirstError {
    fn record(&mut self, step: &'static str, result: DeployerResult<()>) {
        if let Err(e) = result {
            warn!(step, error = %e, "Removal step failed");
            self.0.get_or_insert(e);
        }
    }

    fn into_result(self) -> DeployerResult<()> {
        self.0.map_or(Ok(()), Err)
    }
}

fn remove_dir(path: &Path) -> DeployerResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(dir = %path.display(), "Directory removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeployerError::io(path, e)),
    }
}

pub(super) fn remove(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let config = &deployer.params.config;
    let platform = deployer.platform;
    let manifest = deployer.params.optional_cluster_manifest()?;
    let mut failures = FirstError::default();

    failures.record(
        "service",
        platform_call(capability::SERVICE, || {
            platform.remove_service(&config.service_name)
        }),
    );
    failures.record(
        "firewall",
        platform_call(capability::FIREWALL, || {
            platform.remove_firewall_rules(&config.firewall_rule_prefix)
        }),
    );
    if let Some(spn) = manifest.as_ref().and_then(cluster_spn) {
        failures.record(
            "spn",
            platform_call(capability::DIRECTORY, || platform.unregister_spn(spn)),
        );
    }
    for kind in [NetworkKind::Container, NetworkKind::Isolated] {
        let name = network_name(manifest.as_ref(), kind);
        failures.record(
            "network",
            platform_call(capability::NETWORK, || platform.cleanup_network(&name)),
        );
    }
    for (key, _) in environment_entries(config) {
        failures.record(
            "environment",
            platform_call(capability::ENVIRONMENT, || {
                platform.remove_environment_value(key)
            }),
        );
    }

    if config.skip_delete_data_root {
        info!(data_root = %config.data_root.display(), "Keeping data root");
    } else {
        failures.record("data_root", remove_dir(&config.data_root));
    }

    failures.into_result()?;
    info!("Node removed from this machine");
    Ok(OperationOutcome::Completed)
}

/// Delete logical directories and per-node directories, leaving the rest of
/// the machine configuration in place.
pub(super) fn remove_node_config(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let params = deployer.params;
    let layout = params.layout();
    let manifest = params.optional_cluster_manifest()?;

    let nodes: Vec<String> = match manifest {
        Some(manifest) => {
            for dir in logical_directories(&manifest) {
                remove_dir(&dir)?;
            }
            let resolved = resolve(manifest, &params.load_inventory()?, deployer.identity)?;
            local_nodes(
                &resolved.infrastructure,
                deployer.identity,
                params.node_name.as_deref(),
            )
            .into_iter()
            .map(|n| n.node_name.clone())
            .collect()
        }
        None => {
            let configured = layout.configured_nodes()?;
            match &params.node_name {
                Some(name) => configured.into_iter().filter(|n| n == name).collect(),
                None => configured,
            }
        }
    };

    for node in &nodes {
        remove_dir(&layout.node_root(node))?;
        info!(node = %node, "Node configuration removed");
    }
    Ok(OperationOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_keeps_first() {
        let mut failures = FirstError::default();
        failures.record("a", Ok(()));
        failures.record("b", Err(DeployerError::Config("first".to_string())));
        failures.record("c", Err(DeployerError::Config("second".to_string())));
        let err = failures.into_result().unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn test_remove_dir_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir(&dir.path().join("absent")).unwrap();
    }
}
