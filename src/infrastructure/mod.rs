//! Infrastructure classification and node resolution.
//!
//! The manifest's infrastructure description selects one of a closed set of
//! [`InfrastructureKind`]s. From it, the node type definitions and the
//! inventory, [`Infrastructure::create`] resolves:
//!
//! - the concrete node list, each node carrying its node type;
//! - the `Votes` section: one `SeedNode,<address>:<clusterConnectionPort>`
//!   entry per seed node;
//! - the `SeedNodeClientConnectionAddresses` section: one
//!   `<address>:<clientConnectionPort>` entry per seed node.
//!
//! | Kind | Node source | Unknown node type | Default system |
//! |------|-------------|-------------------|----------------|
//! | Server | manifest (+ local inventory nodes) | error | no |
//! | Azure static | manifest | error | no |
//! | Azure dynamic | inventory | error | yes |
//! | PaaS | inventory | skipped | yes |

mod identity;

pub use identity::LocalMachineIdentity;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv6Addr;

use tracing::{debug, error, info, warn};

use crate::constants::{
    SECTION_SEED_NODE_CLIENT_CONNECTION_ADDRESSES, SECTION_VOTES, SEED_NODE_VOTE_TYPE,
};
use crate::error::{DeployerError, DeployerResult};
use crate::manifest::{
    InfrastructureDescription, InfrastructureInformation, InfrastructureNodeDescription,
    NodeTypeDescription,
};
use crate::settings::{Parameter, SettingsSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AzureTopology {
    /// Nodes are discovered at runtime and delivered through the inventory.
    Dynamic,
    /// Nodes are declared in the manifest.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureKind {
    Server,
    Azure(AzureTopology),
    Paas,
}

impl InfrastructureKind {
    /// Pure classification of an infrastructure description.
    ///
    /// Returns `None` for unsupported descriptions.
    pub fn classify(description: &InfrastructureDescription) -> Option<Self> {
        match description {
            InfrastructureDescription::WindowsServer(_) | InfrastructureDescription::Linux(_) => {
                Some(InfrastructureKind::Server)
            }
            InfrastructureDescription::WindowsAzure(_) => {
                Some(InfrastructureKind::Azure(AzureTopology::Dynamic))
            }
            InfrastructureDescription::WindowsAzureStaticTopology(_) => {
                Some(InfrastructureKind::Azure(AzureTopology::Static))
            }
            InfrastructureDescription::Paas(_) => Some(InfrastructureKind::Paas),
            InfrastructureDescription::Unsupported => None,
        }
    }

    /// Whether the hosting environment, not the operator, owns node identity.
    pub fn is_default_system(&self) -> bool {
        matches!(
            self,
            InfrastructureKind::Azure(AzureTopology::Dynamic) | InfrastructureKind::Paas
        )
    }

    fn nodes_from_inventory(&self) -> bool {
        self.is_default_system()
    }

    fn skips_unknown_node_types(&self) -> bool {
        matches!(self, InfrastructureKind::Paas)
    }
}

impl fmt::Display for InfrastructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfrastructureKind::Server => write!(f, "server"),
            InfrastructureKind::Azure(AzureTopology::Dynamic) => write!(f, "azure-dynamic"),
            InfrastructureKind::Azure(AzureTopology::Static) => write!(f, "azure-static"),
            InfrastructureKind::Paas => write!(f, "paas"),
        }
    }
}

/// A node resolved against its node type.
#[derive(Debug, Clone, PartialEq)]
pub struct InfrastructureNode {
    pub node_name: String,
    pub node_type: NodeTypeDescription,
    /// Normalized: IPv6 literals are bracketed.
    pub ip_address_or_fqdn: String,
    pub is_seed_node: bool,
    pub fault_domain: String,
    pub upgrade_domain: String,
}

impl InfrastructureNode {
    /// `<address>:<port>` for this node.
    pub fn address_with_port(&self, port: u16) -> String {
        format!("{}:{}", self.ip_address_or_fqdn, port)
    }

    /// Whether the node address is a loopback address or `localhost`.
    pub fn is_loopback(&self) -> bool {
        is_loopback_address(&self.ip_address_or_fqdn)
    }
}

/// Resolved infrastructure of the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Infrastructure {
    kind: InfrastructureKind,
    nodes: Vec<InfrastructureNode>,
    votes: SettingsSection,
    seed_node_client_connection_addresses: SettingsSection,
    is_scale_min: bool,
}

impl Infrastructure {
    /// Resolve the infrastructure.
    ///
    /// Returns `Ok(None)` when the description kind is unsupported; callers
    /// that only validate treat that as "infrastructure unavailable".
    pub fn create(
        description: &InfrastructureDescription,
        inventory: &InfrastructureInformation,
        node_types: &[NodeTypeDescription],
        local_identity: &LocalMachineIdentity,
    ) -> DeployerResult<Option<Self>> {
        let Some(kind) = InfrastructureKind::classify(description) else {
            warn!(
                kind = description.kind(),
                "Unsupported infrastructure description"
            );
            return Ok(None);
        };

        let type_map = node_type_map(node_types)?;

        let declared: &[InfrastructureNodeDescription] = if kind.nodes_from_inventory() {
            &inventory.node_list
        } else {
            description.declared_nodes().unwrap_or(&[])
        };

        let mut nodes = Vec::with_capacity(declared.len());
        for node in declared {
            if let Some(resolved) = resolve_node(kind, node, &type_map)? {
                nodes.push(resolved);
            }
        }

        if kind == InfrastructureKind::Server {
            let known: HashSet<String> = nodes.iter().map(|n| n.node_name.clone()).collect();
            for node in &inventory.node_list {
                if known.contains(&node.node_name) || !local_identity.matches(&node.ip_address_or_fqdn)
                {
                    continue;
                }
                info!(
                    node = %node.node_name,
                    "Re-adding local node missing from the manifest"
                );
                if let Some(resolved) = resolve_node(kind, node, &type_map)? {
                    nodes.push(resolved);
                }
            }
        }

        let mut votes = SettingsSection::new(SECTION_VOTES);
        let mut seed_addresses = SettingsSection::new(SECTION_SEED_NODE_CLIENT_CONNECTION_ADDRESSES);
        for node in nodes.iter().filter(|n| n.is_seed_node) {
            let (vote, client_address) = seed_entries(node)?;
            votes.upsert(Parameter::new(node.node_name.clone(), vote));
            seed_addresses.upsert(Parameter::new(node.node_name.clone(), client_address));
        }

        let is_scale_min = match description {
            InfrastructureDescription::WindowsServer(t) | InfrastructureDescription::Linux(t) => {
                t.is_scale_min
            }
            _ => false,
        };

        debug!(
            %kind,
            nodes = nodes.len(),
            seeds = votes.len(),
            is_scale_min,
            "Infrastructure resolved"
        );

        Ok(Some(Self {
            kind,
            nodes,
            votes,
            seed_node_client_connection_addresses: seed_addresses,
            is_scale_min,
        }))
    }

    pub fn kind(&self) -> InfrastructureKind {
        self.kind
    }

    pub fn nodes(&self) -> &[InfrastructureNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&InfrastructureNode> {
        self.nodes.iter().find(|n| n.node_name == name)
    }

    pub fn votes(&self) -> &SettingsSection {
        &self.votes
    }

    pub fn seed_node_client_connection_addresses(&self) -> &SettingsSection {
        &self.seed_node_client_connection_addresses
    }

    pub fn is_default_system(&self) -> bool {
        self.kind.is_default_system()
    }

    pub fn is_scale_min(&self) -> bool {
        self.is_scale_min
    }

    /// The resolved node list as an inventory document.
    pub fn to_inventory(&self) -> InfrastructureInformation {
        InfrastructureInformation {
            node_list: self
                .nodes
                .iter()
                .map(|n| InfrastructureNodeDescription {
                    node_name: n.node_name.clone(),
                    node_type_ref: n.node_type.name.clone(),
                    ip_address_or_fqdn: n.ip_address_or_fqdn.clone(),
                    is_seed_node: n.is_seed_node,
                    fault_domain: n.fault_domain.clone(),
                    upgrade_domain: n.upgrade_domain.clone(),
                })
                .collect(),
        }
    }
}

/// Bracket-wraps a bare IPv6 literal; anything else is returned unchanged.
pub fn normalize_ip_address(address: &str) -> String {
    let address = address.trim();
    let without_zone = address.split('%').next().unwrap_or(address);
    if without_zone.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}

/// Whether `address` is `localhost` or a loopback IP literal, bracketed or not.
pub fn is_loopback_address(address: &str) -> bool {
    let address = address.trim_start_matches('[').trim_end_matches(']');
    address.eq_ignore_ascii_case("localhost")
        || address
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

fn node_type_map(
    node_types: &[NodeTypeDescription],
) -> DeployerResult<HashMap<&str, &NodeTypeDescription>> {
    let mut map = HashMap::with_capacity(node_types.len());
    for node_type in node_types {
        if map.insert(node_type.name.as_str(), node_type).is_some() {
            error!(node_type = %node_type.name, "Duplicate node type definition");
            return Err(DeployerError::DuplicateNodeType(node_type.name.clone()));
        }
    }
    Ok(map)
}

fn resolve_node(
    kind: InfrastructureKind,
    node: &InfrastructureNodeDescription,
    type_map: &HashMap<&str, &NodeTypeDescription>,
) -> DeployerResult<Option<InfrastructureNode>> {
    let Some(node_type) = type_map.get(node.node_type_ref.as_str()) else {
        if kind.skips_unknown_node_types() {
            debug!(
                node = %node.node_name,
                node_type = %node.node_type_ref,
                "Skipping node with inactive node type"
            );
            return Ok(None);
        }
        error!(
            node = %node.node_name,
            node_type = %node.node_type_ref,
            "Node references unknown node type"
        );
        return Err(DeployerError::UnknownNodeTypeReference {
            node: node.node_name.clone(),
            node_type: node.node_type_ref.clone(),
        });
    };

    Ok(Some(InfrastructureNode {
        node_name: node.node_name.clone(),
        node_type: (*node_type).clone(),
        ip_address_or_fqdn: normalize_ip_address(&node.ip_address_or_fqdn),
        is_seed_node: node.is_seed_node,
        fault_domain: node.fault_domain.clone(),
        upgrade_domain: node.upgrade_domain.clone(),
    }))
}

fn seed_entries(node: &InfrastructureNode) -> DeployerResult<(String, String)> {
    let endpoints = &node.node_type.endpoints;
    let cluster = endpoints
        .cluster_connection_endpoint
        .ok_or_else(|| DeployerError::MissingEndpoint {
            node: node.node_name.clone(),
            endpoint: "ClusterConnection",
        })?;
    let client = endpoints
        .client_connection_endpoint
        .ok_or_else(|| DeployerError::MissingEndpoint {
            node: node.node_name.clone(),
            endpoint: "ClientConnection",
        })?;

    Ok((
        format!(
            "{SEED_NODE_VOTE_TYPE},{}",
            node.address_with_port(cluster.port)
        ),
        node.address_with_port(client.port),
    ))
}
