//! Integration tests for infrastructure resolution and settings merging.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use nodeconf::DeployerError;
use nodeconf::constants::DEFAULT_INSTANCE_ID;
use nodeconf::infrastructure::{
    AzureTopology, Infrastructure, InfrastructureKind, LocalMachineIdentity, normalize_ip_address,
};
use nodeconf::manifest::{
    ClusterManifest, InfrastructureInformation, InfrastructureNodeDescription, OverrideParameter,
    SettingsOverridesSection,
};
use nodeconf::operations::resolve;
use nodeconf::ports::{self, PortRangeReduction};
use nodeconf::settings::{ClusterSettings, NodeSettings, Parameter, Settings, SettingsSection, local_nodes};
use nodeconf::versions::Versions;

const NODE_TYPES: &str = r#"[
    {
        "name": "Front",
        "endpoints": {
            "clientConnectionEndpoint": { "port": 19000 },
            "clusterConnectionEndpoint": { "port": 19001 },
            "leaseDriverEndpoint": { "port": 19002 },
            "applicationEndpoints": { "startPort": 30000, "endPort": 30999 },
            "ephemeralEndpoints": { "startPort": 49152, "endPort": 65534 }
        },
        "placementProperties": [ { "name": "Tier", "value": "front" } ],
        "capacities": [ { "name": "Memory", "value": "1024" } ]
    }
]"#;

fn manifest_with(infrastructure: &str, settings: &str) -> ClusterManifest {
    let json = format!(
        r#"{{
            "name": "Prod",
            "version": "1.0",
            "fabricSettings": {settings},
            "infrastructure": {infrastructure},
            "nodeTypes": {NODE_TYPES}
        }}"#
    );
    ClusterManifest::from_json(&json).unwrap()
}

fn server_manifest(settings: &str) -> ClusterManifest {
    manifest_with(
        r#"{
            "kind": "Linux",
            "nodeList": [
                { "nodeName": "N0", "nodeTypeRef": "Front", "ipAddressOrFqdn": "10.0.0.4",
                  "isSeedNode": true, "faultDomain": "fd:/0", "upgradeDomain": "UD0" },
                { "nodeName": "N1", "nodeTypeRef": "Front", "ipAddressOrFqdn": "fe80::1",
                  "isSeedNode": true, "faultDomain": "fd:/1", "upgradeDomain": "UD1" },
                { "nodeName": "N2", "nodeTypeRef": "Front", "ipAddressOrFqdn": "10.0.0.6",
                  "faultDomain": "fd:/2", "upgradeDomain": "UD2" }
            ]
        }"#,
        settings,
    )
}

fn identity(ip: [u8; 4]) -> LocalMachineIdentity {
    LocalMachineIdentity::new(
        vec!["machine".to_string()],
        vec![IpAddr::V4(Ipv4Addr::from(ip))],
    )
}

fn inventory_node(name: &str, node_type: &str, ip: &str) -> InfrastructureNodeDescription {
    InfrastructureNodeDescription {
        node_name: name.to_string(),
        node_type_ref: node_type.to_string(),
        ip_address_or_fqdn: ip.to_string(),
        is_seed_node: false,
        fault_domain: String::new(),
        upgrade_domain: String::new(),
    }
}

fn create(manifest: &ClusterManifest, inventory: &InfrastructureInformation) -> Option<Infrastructure> {
    Infrastructure::create(
        &manifest.infrastructure,
        inventory,
        &manifest.node_types,
        &identity([10, 0, 0, 4]),
    )
    .unwrap()
}

// ============================================================================
// Infrastructure
// ============================================================================

#[test]
fn test_vote_and_seed_address_format() {
    let manifest = server_manifest("[]");
    let infrastructure = create(&manifest, &InfrastructureInformation::default()).unwrap();

    assert_eq!(infrastructure.kind(), InfrastructureKind::Server);
    assert_eq!(infrastructure.nodes().len(), 3);

    let votes = infrastructure.votes();
    assert_eq!(votes.len(), 2);
    assert_eq!(votes.value("N0"), Some("SeedNode,10.0.0.4:19001"));
    assert_eq!(votes.value("N1"), Some("SeedNode,[fe80::1]:19001"));
    assert!(!votes.contains("N2"));

    let seeds = infrastructure.seed_node_client_connection_addresses();
    assert_eq!(seeds.value("N0"), Some("10.0.0.4:19000"));
    assert_eq!(seeds.value("N1"), Some("[fe80::1]:19000"));
}

#[test]
fn test_ipv6_normalization() {
    assert_eq!(normalize_ip_address("fe80::1"), "[fe80::1]");
    assert_eq!(normalize_ip_address(" ::1 "), "[::1]");
    assert_eq!(normalize_ip_address("fe80::1%eth0"), "[fe80::1%eth0]");
    assert_eq!(normalize_ip_address("10.0.0.1"), "10.0.0.1");
    assert_eq!(normalize_ip_address("node-1.contoso.com"), "node-1.contoso.com");
}

#[test]
fn test_server_readds_local_inventory_node() {
    let manifest = server_manifest("[]");
    let inventory = InfrastructureInformation {
        node_list: vec![
            inventory_node("Local", "Front", "10.0.0.4"),
            inventory_node("Remote", "Front", "10.0.0.99"),
        ],
    };
    let infrastructure = create(&manifest, &inventory).unwrap();
    assert!(infrastructure.node("Local").is_some());
    assert!(infrastructure.node("Remote").is_none());
    assert_eq!(infrastructure.nodes().len(), 4);
}

#[test]
fn test_azure_dynamic_takes_nodes_from_inventory() {
    let manifest = manifest_with(
        r#"{ "kind": "WindowsAzure", "roles": [ { "roleName": "FrontRole", "nodeTypeRef": "Front" } ] }"#,
        "[]",
    );
    let mut seed = inventory_node("_Front_0", "Front", "10.1.0.4");
    seed.is_seed_node = true;
    let inventory = InfrastructureInformation {
        node_list: vec![seed, inventory_node("_Front_1", "Front", "10.1.0.5")],
    };
    let infrastructure = create(&manifest, &inventory).unwrap();
    assert_eq!(
        infrastructure.kind(),
        InfrastructureKind::Azure(AzureTopology::Dynamic)
    );
    assert!(infrastructure.is_default_system());
    assert_eq!(infrastructure.nodes().len(), 2);
    assert_eq!(infrastructure.votes().value("_Front_0"), Some("SeedNode,10.1.0.4:19001"));
}

#[test]
fn test_azure_dynamic_unknown_node_type_is_error() {
    let manifest = manifest_with(r#"{ "kind": "WindowsAzure", "roles": [] }"#, "[]");
    let inventory = InfrastructureInformation {
        node_list: vec![inventory_node("X", "Missing", "10.1.0.4")],
    };
    let err = Infrastructure::create(
        &manifest.infrastructure,
        &inventory,
        &manifest.node_types,
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployerError::UnknownNodeTypeReference { .. }));
}

#[test]
fn test_paas_skips_unknown_node_types() {
    let manifest = manifest_with(r#"{ "kind": "PaaS", "roles": [] }"#, "[]");
    let inventory = InfrastructureInformation {
        node_list: vec![
            inventory_node("Active", "Front", "10.2.0.4"),
            inventory_node("Retired", "Back", "10.2.0.5"),
        ],
    };
    let infrastructure = create(&manifest, &inventory).unwrap();
    assert_eq!(infrastructure.kind(), InfrastructureKind::Paas);
    assert_eq!(infrastructure.nodes().len(), 1);
    assert!(infrastructure.node("Active").is_some());
}

#[test]
fn test_server_unknown_node_type_is_error() {
    let manifest = manifest_with(
        r#"{ "kind": "WindowsServer", "nodeList": [
            { "nodeName": "N0", "nodeTypeRef": "Back", "ipAddressOrFqdn": "10.0.0.4" } ] }"#,
        "[]",
    );
    let err = Infrastructure::create(
        &manifest.infrastructure,
        &InfrastructureInformation::default(),
        &manifest.node_types,
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    match err {
        DeployerError::UnknownNodeTypeReference { node, node_type } => {
            assert_eq!(node, "N0");
            assert_eq!(node_type, "Back");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_duplicate_node_types_rejected() {
    let mut manifest = server_manifest("[]");
    manifest.node_types.push(manifest.node_types[0].clone());
    let err = Infrastructure::create(
        &manifest.infrastructure,
        &InfrastructureInformation::default(),
        &manifest.node_types,
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployerError::DuplicateNodeType(name) if name == "Front"));
}

#[test]
fn test_seed_without_cluster_connection_endpoint() {
    let mut manifest = server_manifest("[]");
    manifest.node_types[0].endpoints.cluster_connection_endpoint = None;
    let err = Infrastructure::create(
        &manifest.infrastructure,
        &InfrastructureInformation::default(),
        &manifest.node_types,
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        DeployerError::MissingEndpoint {
            endpoint: "ClusterConnection",
            ..
        }
    ));
}

#[test]
fn test_unsupported_kind_yields_none() {
    let manifest = manifest_with(r#"{ "kind": "Mainframe" }"#, "[]");
    assert!(create(&manifest, &InfrastructureInformation::default()).is_none());

    let err = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployerError::InvalidManifest(_)));
}

#[test]
fn test_inventory_round_trip_keeps_nodes() {
    let manifest = server_manifest("[]");
    let infrastructure = create(&manifest, &InfrastructureInformation::default()).unwrap();
    let inventory = infrastructure.to_inventory();
    assert_eq!(inventory.node_list.len(), 3);
    assert_eq!(inventory.node_list[1].ip_address_or_fqdn, "[fe80::1]");
    assert!(inventory.node_list[0].is_seed_node);
}

// ============================================================================
// Cluster Settings
// ============================================================================

fn to_overrides(settings: &Settings) -> Vec<SettingsOverridesSection> {
    settings
        .sections()
        .iter()
        .map(|section| SettingsOverridesSection {
            name: section.name.clone(),
            parameters: section
                .parameters()
                .iter()
                .map(|p| OverrideParameter {
                    name: p.name.clone(),
                    value: p.value.clone(),
                    is_encrypted: p.is_encrypted,
                })
                .collect(),
        })
        .collect()
}

const LOG_COLLECTION: &str = r#"[
    { "name": "DiagnosticFileStore", "parameters": [
        { "name": "IsAppLogCollectionEnabled", "value": "true" },
        { "name": "StoreConnectionString", "value": "xstore:secret", "isEncrypted": true },
        { "name": "UploadIntervalInMinutes", "value": "5" },
        { "name": "AppLogDirectoryQuotaInMB", "value": "2048" } ] },
    { "name": "Management", "parameters": [
        { "name": "ImageStoreConnectionString", "value": "file:/store" },
        { "name": "MonitoringAgentDirectoryQuota", "value": "512" } ] }
]"#;

#[test]
fn test_merge_is_idempotent() {
    let manifest = server_manifest(LOG_COLLECTION);
    let infrastructure = create(&manifest, &InfrastructureInformation::default()).unwrap();

    let build = |overrides: &[SettingsOverridesSection]| {
        ClusterSettings::build(
            overrides,
            infrastructure.votes(),
            infrastructure.seed_node_client_connection_addresses(),
            None,
        )
        .unwrap()
    };

    let first = build(&manifest.fabric_settings);
    let again = build(&manifest.fabric_settings);
    assert_eq!(first, again);

    let rebuilt = build(&to_overrides(first.settings()));
    assert_eq!(rebuilt, first);
}

#[test]
fn test_log_collection_derives_management() {
    let manifest = server_manifest(LOG_COLLECTION);
    let resolved = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap();

    let management = resolved.cluster_settings.section("Management").unwrap();
    let names: Vec<_> = management.parameters().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "MonitoringAgentStorageAccount",
            "MonitoringAgentTransferInterval",
            "ImageStoreConnectionString",
            "MonitoringAgentDirectoryQuota",
        ]
    );
    assert_eq!(management.value("MonitoringAgentTransferInterval"), Some("300"));
    assert_eq!(management.value("MonitoringAgentDirectoryQuota"), Some("512"));
    assert!(
        management
            .parameter("MonitoringAgentStorageAccount")
            .unwrap()
            .is_encrypted
    );
}

#[test]
fn test_disabled_log_collection_adds_nothing() {
    let manifest = server_manifest(
        r#"[ { "name": "DiagnosticFileStore", "parameters": [
            { "name": "IsAppLogCollectionEnabled", "value": "false" },
            { "name": "UploadIntervalInMinutes", "value": "5" } ] } ]"#,
    );
    let resolved = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap();
    assert!(resolved.cluster_settings.section("Management").is_none());
}

#[test]
fn test_bad_upload_interval_is_fatal() {
    let manifest = server_manifest(
        r#"[ { "name": "DiagnosticFileStore", "parameters": [
            { "name": "IsAppLogCollectionEnabled", "value": "TRUE" },
            { "name": "UploadIntervalInMinutes", "value": "often" } ] } ]"#,
    );
    let err = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployerError::InvalidParameterValue { .. }));
}

#[test]
fn test_sql_votes_merge_behind_seed_votes() {
    let manifest = server_manifest(
        r#"[ { "name": "Votes", "parameters": [
            { "name": "SqlVote", "value": "SQL,Server=db;Database=votes" },
            { "name": "N0", "value": "SQL,shadowed" } ] } ]"#,
    );
    let resolved = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap();
    let votes = resolved.cluster_settings.section("Votes").unwrap();
    assert_eq!(votes.len(), 3);
    assert_eq!(votes.value("N0"), Some("SeedNode,10.0.0.4:19001"));
    assert_eq!(votes.value("SqlVote"), Some("SQL,Server=db;Database=votes"));
}

#[test]
fn test_host_settings_drop_unreliable_transport() {
    let manifest = server_manifest(
        r#"[ { "name": "UnreliableTransport", "parameters": [ { "name": "Drop", "value": "* * 0.1" } ] } ]"#,
    );
    let resolved = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &LocalMachineIdentity::loopback(),
    )
    .unwrap();
    assert!(resolved.cluster_settings.section("UnreliableTransport").is_some());
    assert!(
        resolved
            .cluster_settings
            .host_settings()
            .section("UnreliableTransport")
            .is_none()
    );
}

// ============================================================================
// Node Settings
// ============================================================================

#[test]
fn test_local_nodes_by_identity_and_name() {
    let manifest = server_manifest("[]");
    let infrastructure = create(&manifest, &InfrastructureInformation::default()).unwrap();

    let local = local_nodes(&infrastructure, &identity([10, 0, 0, 6]), None);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].node_name, "N2");

    let named = local_nodes(&infrastructure, &identity([10, 0, 0, 6]), Some("N1"));
    assert_eq!(named[0].node_name, "N1");

    assert!(local_nodes(&infrastructure, &identity([192, 168, 1, 1]), None).is_empty());
}

#[test]
fn test_node_settings_sections() {
    let manifest = server_manifest("[]");
    let resolved = resolve(
        manifest,
        &InfrastructureInformation::default(),
        &identity([10, 0, 0, 4]),
    )
    .unwrap();
    let node = resolved.infrastructure.node("N0").unwrap();
    let versions = Versions::with_instance_id("1.0", 3, "9.1.0.0");
    let settings = NodeSettings::build(
        &resolved.cluster_settings,
        node,
        &resolved.infrastructure,
        &versions,
        Path::new("/data"),
    );

    let fabric_node = settings.settings().section("FabricNode").unwrap();
    assert_eq!(fabric_node.value("InstanceName"), Some("N0"));
    assert_eq!(fabric_node.value("NodeType"), Some("Front"));
    assert_eq!(fabric_node.value("NodeAddress"), Some("10.0.0.4:19001"));
    assert_eq!(fabric_node.value("LeaseAgentAddress"), Some("10.0.0.4:19002"));
    assert_eq!(fabric_node.value("NodeVersion"), Some("9.1.0.0:1.0:3"));
    assert_eq!(fabric_node.value("StartDynamicPortRange"), Some("49152"));
    assert_eq!(fabric_node.value("WorkingDir"), Some("/data/N0/Fabric/work"));
    assert!(fabric_node.value("HttpGatewayListenAddress").is_none());

    let settings = settings.settings();
    assert_eq!(settings.value("NodeProperties", "Tier"), Some("front"));
    assert_eq!(settings.value("NodeCapacities", "Memory"), Some("1024"));
    assert_eq!(settings.value("NodeDomainIds", "NodeFaultDomainIds"), Some("fd:/0"));
    assert!(settings.section("Votes").is_some());
}

// ============================================================================
// Versions
// ============================================================================

#[test]
fn test_instance_id_carry_over() {
    let kept = Versions::compute("1.0", 4, "1.2.3.0_extra", "1.2.3.0");
    assert_eq!(kept.instance_id, 4);
    assert_eq!(kept.config_version, "1.0.4");

    let reset = Versions::compute("1.0", 4, "2.0.0.0", "1.2.3.0");
    assert_eq!(reset.instance_id, DEFAULT_INSTANCE_ID);
    assert_eq!(reset.fabric_instance_version, "2.0.0.0:1.0:0");
}

// ============================================================================
// Port Ranges
// ============================================================================

fn node_with_range(address: &str, start: &str, end: &str) -> NodeSettings {
    let mut settings = Settings::new();
    settings.insert_section(SettingsSection::from_pairs(
        "FabricNode",
        [("StartDynamicPortRange", start), ("EndDynamicPortRange", end)],
    ));
    NodeSettings::from_parts("N", address, settings)
}

#[test]
fn test_scale_min_loopback_skips_port_reduction() {
    let nodes = [node_with_range("127.0.0.1", "49152", "65534")];
    assert!(ports::plan(&nodes, true).is_empty());
    assert_eq!(
        ports::plan(&nodes, false),
        vec![PortRangeReduction {
            start_port: 49152,
            count: 16383,
        }]
    );
}

#[test]
fn test_port_plan_skips_unset_and_handles_inverted_ranges() {
    let mut unset = Settings::new();
    unset.insert_section(SettingsSection::new("FabricNode"));
    let mut partial = SettingsSection::new("FabricNode");
    partial.upsert(Parameter::new("StartDynamicPortRange", "5000"));
    let mut partial_settings = Settings::new();
    partial_settings.insert_section(partial);

    let nodes = [
        NodeSettings::from_parts("A", "10.0.0.1", unset),
        NodeSettings::from_parts("B", "10.0.0.2", partial_settings),
        node_with_range("10.0.0.3", "6000", "5000"),
    ];
    assert_eq!(
        ports::plan(&nodes, false),
        vec![PortRangeReduction {
            start_port: 6000,
            count: 0,
        }]
    );
}
