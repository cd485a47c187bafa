//! Per-node settings.

use std::path::{Path, PathBuf};

use super::{Parameter, Settings, SettingsSection};
use crate::constants::{
    NODE_FABRIC_DIR, NODE_WORK_DIR, PARAM_CLIENT_CONNECTION_ADDRESS,
    PARAM_CLUSTER_MANAGER_REPLICATOR_ADDRESS, PARAM_END_APPLICATION_PORT_RANGE,
    PARAM_END_DYNAMIC_PORT_RANGE, PARAM_FAILOVER_MANAGER_REPLICATOR_ADDRESS,
    PARAM_HTTP_GATEWAY_LISTEN_ADDRESS, PARAM_INSTANCE_NAME, PARAM_IP_ADDRESS_OR_FQDN,
    PARAM_IS_SCALE_MIN, PARAM_LEASE_AGENT_ADDRESS, PARAM_NAMING_REPLICATOR_ADDRESS,
    PARAM_NODE_ADDRESS, PARAM_NODE_FAULT_DOMAIN_ID, PARAM_NODE_FAULT_DOMAIN_IDS,
    PARAM_NODE_TYPE, PARAM_NODE_VERSION, PARAM_RUNTIME_SERVICE_ADDRESS,
    PARAM_START_APPLICATION_PORT_RANGE, PARAM_START_DYNAMIC_PORT_RANGE,
    PARAM_UPGRADE_DOMAIN_ID, PARAM_WORKING_DIR, SECTION_FABRIC_NODE, SECTION_NODE_CAPACITIES,
    SECTION_NODE_DOMAIN_IDS, SECTION_NODE_PROPERTIES,
};
use crate::infrastructure::{Infrastructure, InfrastructureNode, LocalMachineIdentity};
use crate::settings::ClusterSettings;
use crate::versions::Versions;

/// Full runtime settings of one node hosted on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    node_name: String,
    ip_address_or_fqdn: String,
    settings: Settings,
}

impl NodeSettings {
    /// Cluster settings extended with the node's `FabricNode`,
    /// `NodeProperties`, `NodeCapacities` and `NodeDomainIds` sections.
    pub fn build(
        cluster_settings: &ClusterSettings,
        node: &InfrastructureNode,
        infrastructure: &Infrastructure,
        versions: &Versions,
        data_root: &Path,
    ) -> Self {
        let mut settings = cluster_settings.settings().clone();

        settings.insert_section(fabric_node_section(node, infrastructure, versions, data_root));

        settings.insert_section(SettingsSection::from_pairs(
            SECTION_NODE_PROPERTIES,
            node.node_type
                .placement_properties
                .iter()
                .map(|p| (p.name.clone(), p.value.clone())),
        ));
        settings.insert_section(SettingsSection::from_pairs(
            SECTION_NODE_CAPACITIES,
            node.node_type
                .capacities
                .iter()
                .map(|c| (c.name.clone(), c.value.clone())),
        ));
        settings.insert_section(SettingsSection::from_pairs(
            SECTION_NODE_DOMAIN_IDS,
            [
                (PARAM_UPGRADE_DOMAIN_ID, node.upgrade_domain.clone()),
                (PARAM_NODE_FAULT_DOMAIN_IDS, node.fault_domain.clone()),
            ],
        ));

        Self {
            node_name: node.node_name.clone(),
            ip_address_or_fqdn: node.ip_address_or_fqdn.clone(),
            settings,
        }
    }

    /// Assemble node settings from already-resolved parts.
    pub fn from_parts(
        node_name: impl Into<String>,
        ip_address_or_fqdn: impl Into<String>,
        settings: Settings,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            ip_address_or_fqdn: ip_address_or_fqdn.into(),
            settings,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn ip_address_or_fqdn(&self) -> &str {
        &self.ip_address_or_fqdn
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// `<data_root>/<node>/Fabric/work`
pub(crate) fn work_dir(data_root: &Path, node_name: &str) -> PathBuf {
    data_root
        .join(node_name)
        .join(NODE_FABRIC_DIR)
        .join(NODE_WORK_DIR)
}

fn fabric_node_section(
    node: &InfrastructureNode,
    infrastructure: &Infrastructure,
    versions: &Versions,
    data_root: &Path,
) -> SettingsSection {
    let endpoints = &node.node_type.endpoints;
    let mut section = SettingsSection::from_pairs(
        SECTION_FABRIC_NODE,
        [
            (PARAM_INSTANCE_NAME, node.node_name.clone()),
            (PARAM_NODE_TYPE, node.node_type.name.clone()),
            (PARAM_IP_ADDRESS_OR_FQDN, node.ip_address_or_fqdn.clone()),
            (PARAM_NODE_FAULT_DOMAIN_ID, node.fault_domain.clone()),
            (PARAM_UPGRADE_DOMAIN_ID, node.upgrade_domain.clone()),
            (
                PARAM_WORKING_DIR,
                work_dir(data_root, &node.node_name).display().to_string(),
            ),
            (
                PARAM_IS_SCALE_MIN,
                infrastructure.is_scale_min().to_string(),
            ),
            (PARAM_NODE_VERSION, versions.fabric_instance_version.clone()),
        ],
    );

    let addresses = [
        (PARAM_CLIENT_CONNECTION_ADDRESS, endpoints.client_connection_endpoint),
        (PARAM_NODE_ADDRESS, endpoints.cluster_connection_endpoint),
        (PARAM_LEASE_AGENT_ADDRESS, endpoints.lease_driver_endpoint),
        (PARAM_RUNTIME_SERVICE_ADDRESS, endpoints.service_connection_endpoint),
        (
            PARAM_CLUSTER_MANAGER_REPLICATOR_ADDRESS,
            endpoints.cluster_manager_replicator_endpoint,
        ),
        (
            PARAM_NAMING_REPLICATOR_ADDRESS,
            endpoints.naming_replicator_endpoint,
        ),
        (
            PARAM_FAILOVER_MANAGER_REPLICATOR_ADDRESS,
            endpoints.failover_manager_replicator_endpoint,
        ),
        (PARAM_HTTP_GATEWAY_LISTEN_ADDRESS, endpoints.http_gateway_endpoint),
    ];
    for (name, endpoint) in addresses {
        if let Some(endpoint) = endpoint {
            section.upsert(Parameter::new(name, node.address_with_port(endpoint.port)));
        }
    }

    if let Some(range) = endpoints.application_endpoints {
        section.upsert(Parameter::new(
            PARAM_START_APPLICATION_PORT_RANGE,
            range.start_port.to_string(),
        ));
        section.upsert(Parameter::new(
            PARAM_END_APPLICATION_PORT_RANGE,
            range.end_port.to_string(),
        ));
    }
    if let Some(range) = endpoints.ephemeral_endpoints {
        section.upsert(Parameter::new(
            PARAM_START_DYNAMIC_PORT_RANGE,
            range.start_port.to_string(),
        ));
        section.upsert(Parameter::new(
            PARAM_END_DYNAMIC_PORT_RANGE,
            range.end_port.to_string(),
        ));
    }

    section
}

/// Nodes of the infrastructure hosted on this machine.
///
/// An explicit `node_name` selects exactly that node. Otherwise scale-min
/// clusters host every node locally, and other clusters host the nodes whose
/// address belongs to `identity`.
pub fn local_nodes<'a>(
    infrastructure: &'a Infrastructure,
    identity: &LocalMachineIdentity,
    node_name: Option<&str>,
) -> Vec<&'a InfrastructureNode> {
    if let Some(name) = node_name {
        return infrastructure.node(name).into_iter().collect();
    }
    if infrastructure.is_scale_min() {
        return infrastructure.nodes().iter().collect();
    }
    infrastructure
        .nodes()
        .iter()
        .filter(|n| identity.matches(&n.ip_address_or_fqdn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        Endpoint, EndpointProtocol, FabricEndpoints, InfrastructureDescription,
        InfrastructureInformation, InfrastructureNodeDescription, NamedValue,
        NodeTypeDescription, PortRange, ServerTopology,
    };

    fn endpoint(port: u16) -> Option<Endpoint> {
        Some(Endpoint {
            port,
            protocol: EndpointProtocol::Tcp,
        })
    }

    fn infrastructure(is_scale_min: bool) -> Infrastructure {
        let node_type = NodeTypeDescription {
            name: "Front".to_string(),
            endpoints: FabricEndpoints {
                client_connection_endpoint: endpoint(19000),
                cluster_connection_endpoint: endpoint(19001),
                lease_driver_endpoint: endpoint(19002),
                application_endpoints: Some(PortRange {
                    start_port: 30001,
                    end_port: 31000,
                }),
                ephemeral_endpoints: Some(PortRange {
                    start_port: 49152,
                    end_port: 65534,
                }),
                ..Default::default()
            },
            certificates: None,
            placement_properties: vec![NamedValue {
                name: "HasSSD".to_string(),
                value: "true".to_string(),
            }],
            capacities: vec![],
        };
        let nodes = ["10.0.0.1", "10.0.0.2"]
            .iter()
            .enumerate()
            .map(|(i, ip)| InfrastructureNodeDescription {
                node_name: format!("N{i}"),
                node_type_ref: "Front".to_string(),
                ip_address_or_fqdn: ip.to_string(),
                is_seed_node: i == 0,
                fault_domain: format!("fd:/{i}"),
                upgrade_domain: i.to_string(),
            })
            .collect();
        Infrastructure::create(
            &InfrastructureDescription::Linux(ServerTopology {
                is_scale_min,
                node_list: nodes,
            }),
            &InfrastructureInformation::default(),
            &[node_type],
            &LocalMachineIdentity::new(vec![], vec!["10.0.0.2".parse().unwrap()]),
        )
        .unwrap()
        .unwrap()
    }

    fn cluster_settings(infra: &Infrastructure) -> ClusterSettings {
        ClusterSettings::build(
            &[],
            infra.votes(),
            infra.seed_node_client_connection_addresses(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_fabric_node_section() {
        let infra = infrastructure(false);
        let versions = Versions::with_instance_id("1.0", 3, "6.0");
        let settings = NodeSettings::build(
            &cluster_settings(&infra),
            &infra.nodes()[0],
            &infra,
            &versions,
            Path::new("/data"),
        );
        let fabric = settings.settings().section(SECTION_FABRIC_NODE).unwrap();
        assert_eq!(fabric.value(PARAM_INSTANCE_NAME), Some("N0"));
        assert_eq!(fabric.value(PARAM_NODE_ADDRESS), Some("10.0.0.1:19001"));
        assert_eq!(fabric.value(PARAM_LEASE_AGENT_ADDRESS), Some("10.0.0.1:19002"));
        assert_eq!(fabric.value(PARAM_NODE_VERSION), Some("6.0:1.0:3"));
        assert_eq!(fabric.value(PARAM_START_DYNAMIC_PORT_RANGE), Some("49152"));
        assert_eq!(fabric.value(PARAM_WORKING_DIR), Some("/data/N0/Fabric/work"));
        assert!(fabric.value(PARAM_HTTP_GATEWAY_LISTEN_ADDRESS).is_none());
    }

    #[test]
    fn test_node_sections_include_cluster_sections() {
        let infra = infrastructure(false);
        let settings = NodeSettings::build(
            &cluster_settings(&infra),
            &infra.nodes()[1],
            &infra,
            &Versions::with_instance_id("1.0", 0, "6.0"),
            Path::new("/data"),
        );
        let s = settings.settings();
        assert!(s.section("Votes").is_some());
        assert_eq!(s.value(SECTION_NODE_PROPERTIES, "HasSSD"), Some("true"));
        assert_eq!(s.value(SECTION_NODE_DOMAIN_IDS, PARAM_NODE_FAULT_DOMAIN_IDS), Some("fd:/1"));
    }

    #[test]
    fn test_local_nodes_by_identity() {
        let infra = infrastructure(false);
        let identity = LocalMachineIdentity::new(vec![], vec!["10.0.0.2".parse().unwrap()]);
        let names: Vec<_> = local_nodes(&infra, &identity, None)
            .iter()
            .map(|n| n.node_name.as_str())
            .collect();
        assert_eq!(names, vec!["N1"]);
    }

    #[test]
    fn test_local_nodes_scale_min_hosts_all() {
        let infra = infrastructure(true);
        assert_eq!(
            local_nodes(&infra, &LocalMachineIdentity::default(), None).len(),
            2
        );
    }

    #[test]
    fn test_local_nodes_explicit_name() {
        let infra = infrastructure(true);
        let nodes = local_nodes(&infra, &LocalMachineIdentity::default(), Some("N0"));
        assert_eq!(nodes.len(), 1);
        assert!(local_nodes(&infra, &LocalMachineIdentity::default(), Some("Nx")).is_empty());
    }
}
