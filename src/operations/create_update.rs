//! Shared create-or-update step.
//!
//! 1. Update only: compare the new manifest with the one the first local
//!    node runs.
//! 2. Wait for the package source, if any.
//! 3. Host environment.
//! 4. Host settings, seed info, inventory copies, endpoints registry.
//! 5. Per node: versions, settings, manifest and package files, unreliable
//!    transport rules.
//! 6. Dynamic port range.
//! 7. Firewall rules.
//! 8. Host service.
//! 9. Cluster SPN.
//!
//! The target information record is advanced last.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::configure::{configure_environment, install_service};
use super::layout::{DeploymentLayout, PackageRecord, render_seed_info, write_file};
use super::{Deployer, OperationOutcome, ResolvedDeployment, cluster_spn, platform_call, resolve};
use crate::constants::{DEFAULT_CODE_VERSION, DEFAULT_INSTANCE_ID};
use crate::endpoints::{self, Endpoints};
use crate::error::{DeployerError, DeployerResult};
use crate::infrastructure::InfrastructureNode;
use crate::manifest::ClusterManifest;
use crate::platform::{FirewallRule, TransportProtocol, capability};
use crate::ports;
use crate::reachability::is_uri_reachable;
use crate::retry::{LinearBackoffBuilder, lock_policy};
use crate::settings::{NodeSettings, local_nodes};
use crate::target_info::{InstallationInfo, TargetInformation};
use crate::unreliable_transport::UnreliableTransportSettings;
use crate::validation::compare_manifests;
use crate::versions::Versions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NodeSelection {
    /// Nodes hosted on this machine.
    Local,
    /// Every node of the infrastructure.
    All,
}

pub(super) async fn create_or_update(
    deployer: &Deployer<'_>,
    is_update: bool,
    selection: NodeSelection,
) -> DeployerResult<OperationOutcome> {
    let params = deployer.params;
    let config = &params.config;
    let layout = params.layout();

    let manifest = params.load_cluster_manifest()?;
    let inventory = params.load_inventory()?;
    let resolved = resolve(manifest, &inventory, deployer.identity)?;
    let ResolvedDeployment {
        manifest,
        infrastructure,
        cluster_settings,
    } = &resolved;

    let nodes: Vec<&InfrastructureNode> = match selection {
        NodeSelection::Local => {
            local_nodes(infrastructure, deployer.identity, params.node_name.as_deref())
        }
        NodeSelection::All => infrastructure.nodes().iter().collect(),
    };
    if nodes.is_empty() {
        warn!(kind = %infrastructure.kind(), "No nodes to configure on this machine");
    }

    // 1
    if is_update {
        if let Some(first) = nodes.first() {
            let current_path = layout.current_cluster_manifest(&first.node_name);
            if current_path.is_file() {
                let current = ClusterManifest::load(&current_path)?;
                compare_manifests(&current, manifest).into_result()?;
            } else {
                debug!(node = %first.node_name, "No current manifest to compare against");
            }
        }
    }

    // 2
    if let Some(source) = &params.package_source {
        let reachable = is_uri_reachable(
            deployer.probe,
            source,
            config.reachability_timeout,
            config.reachability_interval,
        )
        .await?;
        if !reachable {
            return Err(DeployerError::Unreachable(source.clone()));
        }
    }

    // 3
    configure_environment(deployer.platform, config)?;

    // 4
    cluster_settings
        .host_settings()
        .settings()
        .save(&layout.host_settings())?;
    write_file(
        &layout.seed_info(),
        &render_seed_info(infrastructure.votes()),
    )?;
    let resolved_inventory = infrastructure.to_inventory();
    resolved_inventory.save(&layout.inventory())?;
    resolved_inventory.save(&layout.runtime_inventory())?;
    let rows: Vec<Endpoints> = manifest.node_types.iter().map(Endpoints::from_node_type).collect();
    endpoints::write(&layout.endpoints(), &rows)?;

    // 5
    let mut node_settings = Vec::with_capacity(nodes.len());
    let mut deployed = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let prior = PackageRecord::load(&layout.current_package(&node.node_name))?;
        let target_code = params
            .target_code_version
            .clone()
            .or_else(|| prior.as_ref().map(|r| r.code_version.clone()))
            .unwrap_or_else(|| DEFAULT_CODE_VERSION.to_string());
        let current_code = params
            .current_code_version
            .clone()
            .or_else(|| prior.as_ref().map(|r| r.code_version.clone()))
            .unwrap_or_else(|| target_code.clone());
        let prior_instance_id = params
            .instance_id
            .or_else(|| prior.as_ref().map(|r| r.instance_id))
            .unwrap_or(DEFAULT_INSTANCE_ID);
        let versions = Versions::compute(
            &manifest.version,
            prior_instance_id,
            &target_code,
            &current_code,
        );

        let settings = NodeSettings::build(
            cluster_settings,
            node,
            infrastructure,
            &versions,
            layout.data_root(),
        );
        write_node_configuration(
            &layout,
            manifest,
            &settings,
            &versions,
            &target_code,
            lock_policy(config),
        )?;

        info!(
            node = %node.node_name,
            config_version = %versions.config_version,
            instance_id = versions.instance_id,
            "Node configuration written"
        );
        deployed.push((node.node_name.clone(), versions, target_code));
        node_settings.push(settings);
    }

    // 6
    for reduction in ports::plan(&node_settings, infrastructure.is_scale_min()) {
        platform_call(capability::PORT_RANGE, || {
            deployer.platform.reduce_dynamic_port_range(&reduction)
        })?;
    }

    // 7
    let rules = firewall_rules(&config.firewall_rule_prefix, &nodes);
    if !rules.is_empty() {
        platform_call(capability::FIREWALL, || {
            deployer.platform.ensure_firewall_rules(&rules)
        })?;
    }

    // 8
    install_service(deployer.platform, config, Some(manifest))?;

    // 9
    if let Some(spn) = cluster_spn(manifest) {
        platform_call(capability::DIRECTORY, || deployer.platform.register_spn(spn))?;
    }

    if let Some((node, versions, code_version)) = deployed.first() {
        record_target_installation(deployer, &layout, node, versions, code_version)?;
    }

    Ok(OperationOutcome::Deployed {
        nodes: deployed.into_iter().map(|(name, _, _)| name).collect(),
    })
}

/// Settings, manifests, package record and unreliable transport file of one node.
pub(super) fn write_node_configuration(
    layout: &DeploymentLayout,
    manifest: &ClusterManifest,
    node: &NodeSettings,
    versions: &Versions,
    code_version: &str,
    policy: LinearBackoffBuilder,
) -> DeployerResult<()> {
    let name = node.node_name();

    node.settings()
        .save(&layout.node_settings(name, &versions.config_version))?;

    let manifest_json = manifest.to_json()?;
    write_file(&layout.current_cluster_manifest(name), &manifest_json)?;
    write_file(
        &layout.versioned_cluster_manifest(name, &manifest.version),
        &manifest_json,
    )?;

    write_package_record(layout, name, versions, code_version, policy)?;

    let path = layout.unreliable_transport(name);
    let from_settings = UnreliableTransportSettings::from_settings(node.settings());
    let existing = UnreliableTransportSettings::load(&path)?;
    from_settings.merge(&existing).write(&path)
}

pub(super) fn write_package_record(
    layout: &DeploymentLayout,
    node: &str,
    versions: &Versions,
    code_version: &str,
    policy: LinearBackoffBuilder,
) -> DeployerResult<()> {
    let record = PackageRecord::new(code_version, versions);
    record.save_exclusive(&layout.current_package(node), policy)?;
    record.save(&layout.versioned_package(node, &versions.config_version))
}

/// One inbound rule per named endpoint plus the application port range, for
/// every node. Rules with the same name and ports are emitted once.
pub(super) fn firewall_rules(prefix: &str, nodes: &[&InfrastructureNode]) -> Vec<FirewallRule> {
    let mut rules: Vec<FirewallRule> = Vec::new();
    let mut push = |rule: FirewallRule| {
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    };
    for node in nodes {
        let endpoints = &node.node_type.endpoints;
        for (name, endpoint) in endpoints.named() {
            push(FirewallRule::inbound(
                prefix,
                name,
                TransportProtocol::Tcp,
                endpoint.port,
            ));
        }
        if let Some(range) = endpoints.application_endpoints {
            if range.count() > 0 {
                push(FirewallRule::inbound_range(
                    prefix,
                    "ApplicationEndpoints",
                    TransportProtocol::Tcp,
                    range.start_port,
                    range.end_port,
                ));
            }
        }
    }
    rules
}

/// Advance the target information record to the installation just written.
///
/// The installation's undo entry point re-applies it with this binary.
fn record_target_installation(
    deployer: &Deployer<'_>,
    layout: &DeploymentLayout,
    node: &str,
    versions: &Versions,
    code_version: &str,
) -> DeployerResult<()> {
    let config = &deployer.params.config;
    let path = config.target_info_path();
    let manifest_location = layout.versioned_cluster_manifest(node, &versions.cluster_manifest_version);

    let undo_entry_point: Option<PathBuf> = match std::env::current_exe() {
        Ok(exe) => Some(exe),
        Err(e) => {
            warn!(error = %e, "Cannot determine deployer binary, installation has no undo entry point");
            None
        }
    };
    let undo_arguments = vec![
        "Update".to_string(),
        "--cluster-manifest".to_string(),
        manifest_location.display().to_string(),
        "--data-root".to_string(),
        layout.data_root().display().to_string(),
        "--target-code-version".to_string(),
        code_version.to_string(),
    ];

    let installation = InstallationInfo {
        code_version: code_version.to_string(),
        cluster_manifest_version: versions.cluster_manifest_version.clone(),
        instance_id: versions.instance_id,
        cluster_manifest_location: Some(manifest_location),
        infrastructure_manifest_location: Some(layout.inventory()),
        undo_entry_point,
        undo_arguments,
    };

    let record = TargetInformation::load(&path)?.unwrap_or_default();
    record
        .advance(installation)
        .write_exclusive(&path, lock_policy(config))?;
    debug!(path = %path.display(), "Target installation recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Endpoint, EndpointProtocol, FabricEndpoints, NodeTypeDescription, PortRange};

    fn node(name: &str, port: u16) -> InfrastructureNode {
        InfrastructureNode {
            node_name: name.to_string(),
            node_type: NodeTypeDescription {
                name: "T".to_string(),
                endpoints: FabricEndpoints {
                    client_connection_endpoint: Some(Endpoint {
                        port,
                        protocol: EndpointProtocol::Tcp,
                    }),
                    application_endpoints: Some(PortRange {
                        start_port: 30000,
                        end_port: 30999,
                    }),
                    ..Default::default()
                },
                certificates: None,
                placement_properties: vec![],
                capacities: vec![],
            },
            ip_address_or_fqdn: "10.0.0.1".to_string(),
            is_seed_node: true,
            fault_domain: String::new(),
            upgrade_domain: String::new(),
        }
    }

    #[test]
    fn test_firewall_rules_deduplicate() {
        let a = node("A", 19000);
        let b = node("B", 19000);
        let c = node("C", 19010);
        let rules = firewall_rules("ClusterNode", &[&a, &b, &c]);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].name, "ClusterNode ClientConnection (TCP-In)");
        assert_eq!(rules[1].name, "ClusterNode ApplicationEndpoints (TCP-In)");
        assert!(rules[1].is_range());
        assert_eq!(rules[2].start_port, 19010);
    }
}
