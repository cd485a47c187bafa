use tracing::info;

use super::create_update::write_node_configuration;
use super::layout::PackageRecord;
use super::{Deployer, OperationOutcome, resolve};
use crate::constants::DEFAULT_CODE_VERSION;
use crate::error::{DeployerError, DeployerResult};
use crate::retry::lock_policy;
use crate::settings::{NodeSettings, local_nodes};
use crate::versions::Versions;

/// Rewrite every local node's configuration under an explicit instance id.
pub(super) fn update_instance_id(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let params = deployer.params;
    let instance_id = params
        .instance_id
        .ok_or_else(|| DeployerError::Config("UpdateInstanceId requires an instance id".to_string()))?;
    let layout = params.layout();

    let resolved = resolve(
        params.load_cluster_manifest()?,
        &params.load_inventory()?,
        deployer.identity,
    )?;

    let mut updated = Vec::new();
    for node in local_nodes(
        &resolved.infrastructure,
        deployer.identity,
        params.node_name.as_deref(),
    ) {
        let prior = PackageRecord::load(&layout.current_package(&node.node_name))?;
        let code_version = params
            .target_code_version
            .clone()
            .or_else(|| prior.map(|r| r.code_version))
            .unwrap_or_else(|| DEFAULT_CODE_VERSION.to_string());
        let versions = Versions::with_instance_id(&resolved.manifest.version, instance_id, &code_version);

        let settings = NodeSettings::build(
            &resolved.cluster_settings,
            node,
            &resolved.infrastructure,
            &versions,
            layout.data_root(),
        );
        write_node_configuration(
            &layout,
            &resolved.manifest,
            &settings,
            &versions,
            &code_version,
            lock_policy(&params.config),
        )?;

        info!(
            node = %node.node_name,
            instance_id,
            config_version = %versions.config_version,
            "Instance id updated"
        );
        updated.push(node.node_name.clone());
    }

    Ok(OperationOutcome::Deployed { nodes: updated })
}
