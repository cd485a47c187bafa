//! Typed view over the cluster manifest and the infrastructure inventory.
//!
//! Both documents are JSON. The manifest describes the cluster as authored by
//! the operator; the inventory is the resolved list of machines, written by
//! the provisioning system (or by a previous deployer run).
//!
//! ```json
//! {
//!   "name": "ProdCluster",
//!   "version": "1.0",
//!   "fabricSettings": [{ "name": "Setup", "parameters": [{ "name": "FabricDataRoot", "value": "/data" }] }],
//!   "infrastructure": { "kind": "Linux", "isScaleMin": false, "nodeList": [] },
//!   "nodeTypes": []
//! }
//! ```
//!
//! Nothing here has behaviour beyond lookups; resolution happens in
//! [`infrastructure`](crate::infrastructure) and [`settings`](crate::settings).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeployerError, DeployerResult};

// =============================================================================
// Cluster manifest
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub fabric_settings: Vec<SettingsOverridesSection>,
    pub infrastructure: InfrastructureDescription,
    #[serde(default)]
    pub node_types: Vec<NodeTypeDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<ClusterCertificates>,
}

impl ClusterManifest {
    pub fn from_json(json: &str) -> DeployerResult<Self> {
        serde_json::from_str(json).map_err(|e| DeployerError::InvalidManifest(e.to_string()))
    }

    /// Load a manifest from disk.
    pub fn load(path: &Path) -> DeployerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| DeployerError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> DeployerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Case-insensitive lookup of an override section.
    pub fn section(&self, name: &str) -> Option<&SettingsOverridesSection> {
        self.fabric_settings
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup of an override parameter value.
    pub fn parameter(&self, section: &str, parameter: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.parameter(parameter))
            .map(|p| p.value.as_str())
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeTypeDescription> {
        self.node_types.iter().find(|t| t.name == name)
    }

    /// Certificate used to encrypt secrets in settings, if configured.
    pub fn secrets_certificate(&self) -> Option<&FabricCertificate> {
        self.certificates
            .as_ref()
            .and_then(|c| c.secret_encryption_certificate.as_ref())
    }
}

/// An operator-authored settings section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverridesSection {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<OverrideParameter>,
}

impl SettingsOverridesSection {
    pub fn parameter(&self, name: &str) -> Option<&OverrideParameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_encrypted: bool,
}

// =============================================================================
// Node types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDescription {
    pub name: String,
    pub endpoints: FabricEndpoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<ClusterCertificates>,
    #[serde(default)]
    pub placement_properties: Vec<NamedValue>,
    #[serde(default)]
    pub capacities: Vec<NamedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    #[default]
    Tcp,
    Http,
    Https,
}

impl EndpointProtocol {
    /// Transport-level protocol used for firewall rules.
    pub fn transport(&self) -> &'static str {
        "TCP"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub port: u16,
    #[serde(default)]
    pub protocol: EndpointProtocol,
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortRange {
    pub fn count(&self) -> u32 {
        if self.end_port < self.start_port {
            0
        } else {
            u32::from(self.end_port - self.start_port) + 1
        }
    }
}

/// Endpoints a node of a given type listens on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricEndpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_connection_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_driver_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_connection_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_connection_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_gateway_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_replicator_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_replicator_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_manager_replicator_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_manager_replicator_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_endpoints: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_endpoints: Option<PortRange>,
}

impl FabricEndpoints {
    /// Named single-port endpoints, in a stable order.
    pub fn named(&self) -> Vec<(&'static str, Endpoint)> {
        [
            ("ClientConnection", self.client_connection_endpoint),
            ("LeaseDriver", self.lease_driver_endpoint),
            ("ClusterConnection", self.cluster_connection_endpoint),
            ("ServiceConnection", self.service_connection_endpoint),
            ("HttpGateway", self.http_gateway_endpoint),
            ("DefaultReplicator", self.default_replicator_endpoint),
            ("NamingReplicator", self.naming_replicator_endpoint),
            ("FMReplicator", self.failover_manager_replicator_endpoint),
            ("CMReplicator", self.cluster_manager_replicator_endpoint),
        ]
        .into_iter()
        .filter_map(|(name, endpoint)| endpoint.map(|e| (name, e)))
        .collect()
    }
}

// =============================================================================
// Certificates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricCertificate {
    #[serde(default = "default_find_type")]
    pub x509_find_type: String,
    pub x509_find_value: String,
    #[serde(default = "default_store_name")]
    pub x509_store_name: String,
}

fn default_find_type() -> String {
    "FindByThumbprint".to_string()
}

fn default_store_name() -> String {
    "My".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCertificates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_certificate: Option<FabricCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_certificate: Option<FabricCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<FabricCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_encryption_certificate: Option<FabricCertificate>,
}

// =============================================================================
// Infrastructure description
// =============================================================================

/// Infrastructure section of the manifest, tagged by `kind`.
///
/// Unrecognized kinds deserialize to [`InfrastructureDescription::Unsupported`]
/// rather than failing, so that validation-only flows can still inspect the
/// rest of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InfrastructureDescription {
    WindowsServer(ServerTopology),
    Linux(ServerTopology),
    WindowsAzure(RoleTopology),
    WindowsAzureStaticTopology(StaticTopology),
    #[serde(rename = "PaaS")]
    Paas(RoleTopology),
    #[serde(other)]
    Unsupported,
}

impl InfrastructureDescription {
    pub fn kind(&self) -> &'static str {
        match self {
            InfrastructureDescription::WindowsServer(_) => "WindowsServer",
            InfrastructureDescription::Linux(_) => "Linux",
            InfrastructureDescription::WindowsAzure(_) => "WindowsAzure",
            InfrastructureDescription::WindowsAzureStaticTopology(_) => {
                "WindowsAzureStaticTopology"
            }
            InfrastructureDescription::Paas(_) => "PaaS",
            InfrastructureDescription::Unsupported => "Unsupported",
        }
    }

    /// Node list declared in the manifest itself, if this kind has one.
    pub fn declared_nodes(&self) -> Option<&[InfrastructureNodeDescription]> {
        match self {
            InfrastructureDescription::WindowsServer(t) | InfrastructureDescription::Linux(t) => {
                Some(&t.node_list)
            }
            InfrastructureDescription::WindowsAzureStaticTopology(t) => Some(&t.node_list),
            _ => None,
        }
    }
}

impl fmt::Display for InfrastructureDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTopology {
    #[serde(default)]
    pub is_scale_min: bool,
    #[serde(default)]
    pub node_list: Vec<InfrastructureNodeDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticTopology {
    #[serde(default)]
    pub node_list: Vec<InfrastructureNodeDescription>,
}

/// Topology whose node list is discovered at runtime and delivered through
/// the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTopology {
    #[serde(default)]
    pub roles: Vec<RoleDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDescription {
    pub role_name: String,
    pub node_type_ref: String,
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureNodeDescription {
    pub node_name: String,
    pub node_type_ref: String,
    pub ip_address_or_fqdn: String,
    #[serde(default)]
    pub is_seed_node: bool,
    #[serde(default)]
    pub fault_domain: String,
    #[serde(default)]
    pub upgrade_domain: String,
}

/// Resolved machine inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureInformation {
    #[serde(default)]
    pub node_list: Vec<InfrastructureNodeDescription>,
}

impl InfrastructureInformation {
    pub fn load(path: &Path) -> DeployerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| DeployerError::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| DeployerError::InvalidManifest(e.to_string()))
    }

    /// Loads the inventory, treating a missing file as empty.
    pub fn load_or_default(path: &Path) -> DeployerResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> DeployerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| DeployerError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "Test",
        "version": "2.1",
        "fabricSettings": [
            { "name": "Setup", "parameters": [ { "name": "FabricDataRoot", "value": "/data" } ] }
        ],
        "infrastructure": {
            "kind": "Linux",
            "isScaleMin": true,
            "nodeList": [
                { "nodeName": "N1", "nodeTypeRef": "T", "ipAddressOrFqdn": "10.0.0.1", "isSeedNode": true }
            ]
        },
        "nodeTypes": [
            {
                "name": "T",
                "endpoints": {
                    "clientConnectionEndpoint": { "port": 19000 },
                    "httpGatewayEndpoint": { "port": 19080, "protocol": "http" },
                    "applicationEndpoints": { "startPort": 30001, "endPort": 31000 }
                }
            }
        ],
        "certificates": { "secretEncryptionCertificate": { "x509FindValue": "AB12" } }
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ClusterManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.version, "2.1");
        assert_eq!(manifest.infrastructure.kind(), "Linux");
        assert_eq!(manifest.parameter("setup", "fabricdataroot"), Some("/data"));
        let cert = manifest.secrets_certificate().unwrap();
        assert_eq!(cert.x509_store_name, "My");
        assert_eq!(cert.x509_find_type, "FindByThumbprint");
    }

    #[test]
    fn test_unknown_infrastructure_kind_is_unsupported() {
        let json = MANIFEST.replace("\"kind\": \"Linux\"", "\"kind\": \"Mainframe\"");
        let manifest = ClusterManifest::from_json(&json).unwrap();
        assert_eq!(manifest.infrastructure, InfrastructureDescription::Unsupported);
        assert!(manifest.infrastructure.declared_nodes().is_none());
    }

    #[test]
    fn test_paas_kind() {
        let json = r#"{ "kind": "PaaS", "roles": [ { "roleName": "R", "nodeTypeRef": "T" } ] }"#;
        let description: InfrastructureDescription = serde_json::from_str(json).unwrap();
        assert_eq!(description.kind(), "PaaS");
    }

    #[test]
    fn test_malformed_manifest_is_invalid() {
        let err = ClusterManifest::from_json("{ \"name\": 1 }").unwrap_err();
        assert!(matches!(err, DeployerError::InvalidManifest(_)));
    }

    #[test]
    fn test_named_endpoints_skip_absent() {
        let manifest = ClusterManifest::from_json(MANIFEST).unwrap();
        let names: Vec<_> = manifest.node_types[0]
            .endpoints
            .named()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["ClientConnection", "HttpGateway"]);
    }

    #[test]
    fn test_port_range_count() {
        let range = PortRange {
            start_port: 30001,
            end_port: 31000,
        };
        assert_eq!(range.count(), 1000);
        let inverted = PortRange {
            start_port: 10,
            end_port: 5,
        };
        assert_eq!(inverted.count(), 0);
    }

    #[test]
    fn test_inventory_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory =
            InfrastructureInformation::load_or_default(&dir.path().join("missing.json")).unwrap();
        assert!(inventory.node_list.is_empty());
    }
}
