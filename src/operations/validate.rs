//! Read-only manifest checks.

use tracing::{debug, info};

use super::{Deployer, OperationOutcome};
use crate::error::{DeployerError, DeployerResult};
use crate::infrastructure::Infrastructure;
use crate::manifest::ClusterManifest;
use crate::validation::{compare_manifests, validate_manifest};

/// Manifest the node currently runs: the explicit one, or the one recorded
/// for the first configured node.
fn current_manifest(deployer: &Deployer<'_>) -> DeployerResult<Option<ClusterManifest>> {
    let params = deployer.params;
    if let Some(manifest) = params.optional_cluster_manifest()? {
        return Ok(Some(manifest));
    }
    let layout = params.layout();
    for node in layout.configured_nodes()? {
        let path = layout.current_cluster_manifest(&node);
        if path.is_file() {
            debug!(node = %node, "Comparing against the configured node's manifest");
            return ClusterManifest::load(&path).map(Some);
        }
    }
    Ok(None)
}

/// Validate a proposed manifest, and compare it with the running one when
/// there is one.
pub(super) fn validate(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let path = deployer.params.proposed_manifest.as_deref().ok_or_else(|| {
        DeployerError::Config("Validate requires a proposed manifest".to_string())
    })?;
    let proposed = ClusterManifest::load(path)?;

    let mut report = validate_manifest(&proposed);
    match current_manifest(deployer)? {
        Some(current) => report.extend(compare_manifests(&current, &proposed)),
        None => info!("No current manifest, validating the proposal alone"),
    }

    let report = report.into_result()?;
    info!(
        warnings = report.warnings.len(),
        modified = report.modified_settings.len(),
        "Proposed manifest is valid"
    );
    Ok(OperationOutcome::Validated(report))
}

pub(super) fn validate_cluster_manifest(deployer: &Deployer<'_>) -> DeployerResult<OperationOutcome> {
    let params = deployer.params;
    let manifest = params.load_cluster_manifest()?;
    let mut report = validate_manifest(&manifest);

    match Infrastructure::create(
        &manifest.infrastructure,
        &params.load_inventory()?,
        &manifest.node_types,
        deployer.identity,
    ) {
        Ok(Some(infrastructure)) => debug!(nodes = infrastructure.nodes().len(), "Infrastructure resolved"),
        Ok(None) => report.warnings.push(format!(
            "infrastructure unavailable for kind {}",
            manifest.infrastructure
        )),
        Err(e) => report.errors.push(e.to_string()),
    }

    report.into_result().map(OperationOutcome::Validated)
}
