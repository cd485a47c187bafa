//! Deployment operations.
//!
//! Every invocation performs exactly one [`DeploymentOperation`]. A
//! [`Deployer`] binds the per-invocation [`DeploymentParameters`] to the
//! platform capabilities, the local machine identity and the reachability
//! probe, and [`Deployer::run`] dispatches the operation inside a
//! `deployment` span, recording its outcome and duration.
//!
//! | Operation | Needs cluster manifest | Touches |
//! |-----------|------------------------|---------|
//! | `Create`, `Update`, `UpdateNodeState` | yes | data root, platform |
//! | `UpdateInstanceId` | yes | data root |
//! | `Configure` | optional | environment, service, directories |
//! | `Remove`, `RemoveNodeConfig` | optional | everything the deployer created |
//! | `Rollback` | no | target information, process launcher |
//! | `Validate`, `ValidateClusterManifest` | yes | nothing |
//! | network and DNS operations | optional | network, firewall |

mod configure;
mod create_update;
mod instance_id;
pub mod layout;
mod network;
mod remove;
mod rollback;
mod validate;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use tracing::{Instrument, error, info};

use crate::config::DeployerConfig;
use crate::constants::{
    PARAM_CLUSTER_CREDENTIAL_TYPE, PARAM_CLUSTER_SPN, SECTION_SECURITY, SECTION_VOTES,
    WINDOWS_CREDENTIAL_TYPE,
};
use crate::error::{DeployerError, DeployerResult};
use crate::infrastructure::{Infrastructure, InfrastructureKind, LocalMachineIdentity};
use crate::manifest::{ClusterManifest, InfrastructureInformation};
use crate::metrics::{record_operation, record_platform_call};
use crate::platform::Platform;
use crate::reachability::ReachabilityProbe;
use crate::settings::{ClusterSettings, Parameter};
use crate::telemetry::deployment_span;
use crate::validation::ValidationReport;

use layout::DeploymentLayout;

pub use rollback::RollbackOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentOperation {
    Create,
    Update,
    UpdateInstanceId,
    UpdateNodeState,
    Remove,
    RemoveNodeConfig,
    Rollback,
    Validate,
    ValidateClusterManifest,
    Configure,
    DockerDnsSetup,
    DockerDnsCleanup,
    ContainerNetworkSetup,
    ContainerNetworkCleanup,
    IsolatedNetworkSetup,
    IsolatedNetworkCleanup,
}

impl DeploymentOperation {
    pub const ALL: [DeploymentOperation; 16] = [
        DeploymentOperation::Create,
        DeploymentOperation::Update,
        DeploymentOperation::UpdateInstanceId,
        DeploymentOperation::UpdateNodeState,
        DeploymentOperation::Remove,
        DeploymentOperation::RemoveNodeConfig,
        DeploymentOperation::Rollback,
        DeploymentOperation::Validate,
        DeploymentOperation::ValidateClusterManifest,
        DeploymentOperation::Configure,
        DeploymentOperation::DockerDnsSetup,
        DeploymentOperation::DockerDnsCleanup,
        DeploymentOperation::ContainerNetworkSetup,
        DeploymentOperation::ContainerNetworkCleanup,
        DeploymentOperation::IsolatedNetworkSetup,
        DeploymentOperation::IsolatedNetworkCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentOperation::Create => "Create",
            DeploymentOperation::Update => "Update",
            DeploymentOperation::UpdateInstanceId => "UpdateInstanceId",
            DeploymentOperation::UpdateNodeState => "UpdateNodeState",
            DeploymentOperation::Remove => "Remove",
            DeploymentOperation::RemoveNodeConfig => "RemoveNodeConfig",
            DeploymentOperation::Rollback => "Rollback",
            DeploymentOperation::Validate => "Validate",
            DeploymentOperation::ValidateClusterManifest => "ValidateClusterManifest",
            DeploymentOperation::Configure => "Configure",
            DeploymentOperation::DockerDnsSetup => "DockerDnsSetup",
            DeploymentOperation::DockerDnsCleanup => "DockerDnsCleanup",
            DeploymentOperation::ContainerNetworkSetup => "ContainerNetworkSetup",
            DeploymentOperation::ContainerNetworkCleanup => "ContainerNetworkCleanup",
            DeploymentOperation::IsolatedNetworkSetup => "IsolatedNetworkSetup",
            DeploymentOperation::IsolatedNetworkCleanup => "IsolatedNetworkCleanup",
        }
    }
}

impl fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; `-` and `_` are ignored, so `update-instance-id`,
/// `update_instance_id` and `UpdateInstanceId` are the same operation.
impl FromStr for DeploymentOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown deployment operation: {s}"))
    }
}

/// Per-invocation inputs.
#[derive(Debug, Clone)]
pub struct DeploymentParameters {
    pub operation: DeploymentOperation,
    pub config: DeployerConfig,
    pub cluster_manifest: Option<PathBuf>,
    pub infrastructure_manifest: Option<PathBuf>,
    pub proposed_manifest: Option<PathBuf>,
    /// Restrict the operation to this node.
    pub node_name: Option<String>,
    pub instance_id: Option<u64>,
    pub target_code_version: Option<String>,
    pub current_code_version: Option<String>,
    /// Package location that must be reachable before deploying.
    pub package_source: Option<String>,
}

impl DeploymentParameters {
    pub fn new(operation: DeploymentOperation, config: DeployerConfig) -> Self {
        Self {
            operation,
            config,
            cluster_manifest: None,
            infrastructure_manifest: None,
            proposed_manifest: None,
            node_name: None,
            instance_id: None,
            target_code_version: None,
            current_code_version: None,
            package_source: None,
        }
    }

    pub fn layout(&self) -> DeploymentLayout {
        DeploymentLayout::new(&self.config.data_root)
    }

    fn cluster_manifest_path(&self) -> DeployerResult<&Path> {
        self.cluster_manifest.as_deref().ok_or_else(|| {
            DeployerError::Config(format!("{} requires a cluster manifest", self.operation))
        })
    }

    pub fn load_cluster_manifest(&self) -> DeployerResult<ClusterManifest> {
        ClusterManifest::load(self.cluster_manifest_path()?)
    }

    /// The cluster manifest, if one was given.
    pub fn optional_cluster_manifest(&self) -> DeployerResult<Option<ClusterManifest>> {
        self.cluster_manifest
            .as_deref()
            .map(ClusterManifest::load)
            .transpose()
    }

    /// Inventory from the given path, or the copy kept under the data root.
    pub fn load_inventory(&self) -> DeployerResult<InfrastructureInformation> {
        match &self.infrastructure_manifest {
            Some(path) => InfrastructureInformation::load(path),
            None => InfrastructureInformation::load_or_default(&self.layout().inventory()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Configuration written for these nodes.
    Deployed { nodes: Vec<String> },
    RolledBack(RollbackOutcome),
    Validated(ValidationReport),
    Completed,
}

/// Manifest, infrastructure and cluster settings resolved for one run.
#[derive(Debug, Clone)]
pub struct ResolvedDeployment {
    pub manifest: ClusterManifest,
    pub infrastructure: Infrastructure,
    pub cluster_settings: ClusterSettings,
}

/// Resolve the infrastructure and cluster settings of `manifest`.
///
/// SQL votes declared in the manifest's `Votes` section are added to the
/// seed node votes; on a name collision the seed node vote wins.
pub fn resolve(
    manifest: ClusterManifest,
    inventory: &InfrastructureInformation,
    identity: &LocalMachineIdentity,
) -> DeployerResult<ResolvedDeployment> {
    let infrastructure = Infrastructure::create(
        &manifest.infrastructure,
        inventory,
        &manifest.node_types,
        identity,
    )?
    .ok_or_else(|| {
        error!(kind = %manifest.infrastructure, "Unsupported infrastructure");
        DeployerError::InvalidManifest(format!(
            "unsupported infrastructure kind {}",
            manifest.infrastructure
        ))
    })?;

    let mut votes = infrastructure.votes().clone();
    if let Some(declared) = manifest.section(SECTION_VOTES) {
        for vote in &declared.parameters {
            if !votes.contains(&vote.name) {
                votes.upsert(Parameter::new(vote.name.clone(), vote.value.clone()));
            }
        }
    }

    let cluster_settings = ClusterSettings::build(
        &manifest.fabric_settings,
        &votes,
        infrastructure.seed_node_client_connection_addresses(),
        manifest.secrets_certificate(),
    )?;

    Ok(ResolvedDeployment {
        manifest,
        infrastructure,
        cluster_settings,
    })
}

/// Cluster SPN to register, if the manifest asks for Windows credentials.
pub(crate) fn cluster_spn(manifest: &ClusterManifest) -> Option<&str> {
    let credential_type = manifest.parameter(SECTION_SECURITY, PARAM_CLUSTER_CREDENTIAL_TYPE)?;
    if !credential_type.trim().eq_ignore_ascii_case(WINDOWS_CREDENTIAL_TYPE) {
        return None;
    }
    if InfrastructureKind::classify(&manifest.infrastructure).is_some_and(|k| k.is_default_system()) {
        return None;
    }
    manifest
        .parameter(SECTION_SECURITY, PARAM_CLUSTER_SPN)
        .map(str::trim)
        .filter(|spn| !spn.is_empty())
}

/// Run one platform capability call, recording its outcome.
pub(crate) fn platform_call<T>(
    capability: &'static str,
    call: impl FnOnce() -> DeployerResult<T>,
) -> DeployerResult<T> {
    let result = call();
    record_platform_call(capability, result.is_ok());
    if let Err(e) = &result {
        error!(capability, error = %e, "Platform call failed");
    }
    result
}

/// Executes one deployment operation.
pub struct Deployer<'a> {
    params: &'a DeploymentParameters,
    platform: &'a dyn Platform,
    identity: &'a LocalMachineIdentity,
    probe: &'a dyn ReachabilityProbe,
}

impl<'a> Deployer<'a> {
    pub fn new(
        params: &'a DeploymentParameters,
        platform: &'a dyn Platform,
        identity: &'a LocalMachineIdentity,
        probe: &'a dyn ReachabilityProbe,
    ) -> Self {
        Self {
            params,
            platform,
            identity,
            probe,
        }
    }

    pub fn params(&self) -> &DeploymentParameters {
        self.params
    }

    pub async fn run(&self) -> DeployerResult<OperationOutcome> {
        let operation = self.params.operation;
        let started = Instant::now();
        let span = deployment_span(operation.as_str());

        let result = async {
            info!(data_root = %self.params.config.data_root.display(), "Deployment started");
            self.dispatch().await
        }
        .instrument(span.clone())
        .await;

        record_operation(operation.as_str(), result.is_ok(), started);
        let _entered = span.enter();
        match &result {
            Ok(outcome) => info!(
                ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Deployment finished"
            ),
            Err(e) => error!(error = %e, "Deployment failed"),
        }
        result
    }

    async fn dispatch(&self) -> DeployerResult<OperationOutcome> {
        use create_update::NodeSelection;
        use network::NetworkAction;

        match self.params.operation {
            DeploymentOperation::Create => {
                create_update::create_or_update(self, false, NodeSelection::Local).await
            }
            DeploymentOperation::Update => {
                create_update::create_or_update(self, true, NodeSelection::Local).await
            }
            DeploymentOperation::UpdateNodeState => {
                create_update::create_or_update(self, false, NodeSelection::All).await
            }
            DeploymentOperation::UpdateInstanceId => instance_id::update_instance_id(self),
            DeploymentOperation::Configure => configure::configure(self),
            DeploymentOperation::Remove => remove::remove(self),
            DeploymentOperation::RemoveNodeConfig => remove::remove_node_config(self),
            DeploymentOperation::Rollback => rollback::rollback(self).map(OperationOutcome::RolledBack),
            DeploymentOperation::Validate => validate::validate(self),
            DeploymentOperation::ValidateClusterManifest => validate::validate_cluster_manifest(self),
            DeploymentOperation::DockerDnsSetup => network::docker_dns(self, NetworkAction::Setup),
            DeploymentOperation::DockerDnsCleanup => {
                network::docker_dns(self, NetworkAction::Cleanup)
            }
            DeploymentOperation::ContainerNetworkSetup => {
                network::container_network(self, NetworkAction::Setup)
            }
            DeploymentOperation::ContainerNetworkCleanup => {
                network::container_network(self, NetworkAction::Cleanup)
            }
            DeploymentOperation::IsolatedNetworkSetup => {
                network::isolated_network(self, NetworkAction::Setup)
            }
            DeploymentOperation::IsolatedNetworkCleanup => {
                network::isolated_network(self, NetworkAction::Cleanup)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parse_variants() {
        assert_eq!(
            "update-instance-id".parse::<DeploymentOperation>().unwrap(),
            DeploymentOperation::UpdateInstanceId
        );
        assert_eq!(
            "DOCKER_DNS_SETUP".parse::<DeploymentOperation>().unwrap(),
            DeploymentOperation::DockerDnsSetup
        );
        assert!("launch".parse::<DeploymentOperation>().is_err());
    }

    #[test]
    fn test_operation_display_round_trips() {
        for op in DeploymentOperation::ALL {
            assert_eq!(op.to_string().parse::<DeploymentOperation>().unwrap(), op);
        }
    }

    #[test]
    fn test_missing_manifest_is_config_error() {
        let params = DeploymentParameters::new(DeploymentOperation::Create, DeployerConfig::default());
        assert!(matches!(
            params.load_cluster_manifest(),
            Err(DeployerError::Config(_))
        ));
    }
}
