//! Container networks and container DNS.

use tracing::info;

use super::{Deployer, OperationOutcome, platform_call};
use crate::constants::{
    DEFAULT_CONTAINER_NETWORK_NAME, DEFAULT_ISOLATED_NETWORK_NAME, DNS_PORT,
    PARAM_CONTAINER_NETWORK_NAME, PARAM_ISOLATED_NETWORK_NAME, SECTION_DNS_SERVICE,
    SECTION_HOSTING,
};
use crate::error::DeployerResult;
use crate::manifest::ClusterManifest;
use crate::platform::{FirewallRule, NetworkKind, TransportProtocol, capability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NetworkAction {
    Setup,
    Cleanup,
}

/// Network name from the `Hosting` section, or the default.
pub(crate) fn network_name(manifest: Option<&ClusterManifest>, kind: NetworkKind) -> String {
    let (parameter, default) = match kind {
        NetworkKind::Container => (PARAM_CONTAINER_NETWORK_NAME, DEFAULT_CONTAINER_NETWORK_NAME),
        NetworkKind::Isolated => (PARAM_ISOLATED_NETWORK_NAME, DEFAULT_ISOLATED_NETWORK_NAME),
    };
    manifest
        .and_then(|m| m.parameter(SECTION_HOSTING, parameter))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn dns_rule(prefix: &str) -> FirewallRule {
    FirewallRule::inbound(prefix, SECTION_DNS_SERVICE, TransportProtocol::Udp, DNS_PORT)
}

pub(super) fn docker_dns(
    deployer: &Deployer<'_>,
    action: NetworkAction,
) -> DeployerResult<OperationOutcome> {
    let platform = deployer.platform;
    let rule = dns_rule(&deployer.params.config.firewall_rule_prefix);
    match action {
        NetworkAction::Setup => {
            platform_call(capability::FIREWALL, || {
                platform.ensure_firewall_rules(std::slice::from_ref(&rule))
            })?;
            platform_call(capability::NETWORK, || platform.setup_dns())?;
            info!(rule = %rule.name, "Container DNS configured");
        }
        NetworkAction::Cleanup => {
            platform_call(capability::NETWORK, || platform.cleanup_dns())?;
            platform_call(capability::FIREWALL, || {
                platform.remove_firewall_rules(&rule.name)
            })?;
            info!(rule = %rule.name, "Container DNS cleaned up");
        }
    }
    Ok(OperationOutcome::Completed)
}

fn named_network(
    deployer: &Deployer<'_>,
    kind: NetworkKind,
    action: NetworkAction,
) -> DeployerResult<OperationOutcome> {
    let manifest = deployer.params.optional_cluster_manifest()?;
    let name = network_name(manifest.as_ref(), kind);
    let platform = deployer.platform;
    match action {
        NetworkAction::Setup => {
            platform_call(capability::NETWORK, || platform.setup_network(&name, kind))?
        }
        NetworkAction::Cleanup => {
            platform_call(capability::NETWORK, || platform.cleanup_network(&name))?
        }
    }
    info!(network = %name, ?kind, ?action, "Network operation completed");
    Ok(OperationOutcome::Completed)
}

pub(super) fn container_network(
    deployer: &Deployer<'_>,
    action: NetworkAction,
) -> DeployerResult<OperationOutcome> {
    named_network(deployer, NetworkKind::Container, action)
}

pub(super) fn isolated_network(
    deployer: &Deployer<'_>,
    action: NetworkAction,
) -> DeployerResult<OperationOutcome> {
    named_network(deployer, NetworkKind::Isolated, action)
}
