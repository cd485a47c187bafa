//! Tests for the node-local files: unreliable transport rules and the
//! endpoints registry.

use nodeconf::endpoints::{self, Endpoints};
use nodeconf::error::DeployerError;
use nodeconf::manifest::ClusterManifest;
use nodeconf::settings::{Settings, SettingsSection};
use nodeconf::unreliable_transport::{ParsedSpecification, UnreliableTransportSettings};

fn rules(pairs: &[(&str, &str)]) -> UnreliableTransportSettings {
    let mut settings = Settings::new();
    settings.insert_section(SettingsSection::from_pairs(
        "UnreliableTransport",
        pairs.iter().copied(),
    ));
    UnreliableTransportSettings::from_settings(&settings)
}

// ============================================================================
// Unreliable Transport
// ============================================================================

#[test]
fn test_merge_precedence() {
    let merged = rules(&[("A", "x")]).merge(&rules(&[("A", "y"), ("B", "z")]));
    assert_eq!(merged.specifications().len(), 2);
    assert_eq!(merged.get("A"), Some("x"));
    assert_eq!(merged.get("B"), Some("z"));
    assert_eq!(merged.render(), "A=x\nB=z\n");
}

#[test]
fn test_merge_with_empty_sets() {
    let own = rules(&[("A", "x")]);
    let empty = UnreliableTransportSettings::default();
    assert_eq!(own.merge(&empty), own);
    assert_eq!(empty.merge(&own), own);
}

#[test]
fn test_parse_file_contents() {
    let parsed = UnreliableTransportSettings::parse("Drop=* * 0.5\r\n\nbare\n=orphan\nDrop=override\n");
    assert_eq!(parsed.get("bare"), Some(""));
    assert_eq!(parsed.get("drop"), Some("override"));
    assert_eq!(parsed.specifications().len(), 2);
}

#[test]
fn test_settings_entry_with_equals_is_dropped() {
    assert!(matches!(
        ParsedSpecification::from_entry("a=b", "c"),
        ParsedSpecification::Malformed { .. }
    ));
    let from_settings = rules(&[("a=b", "c"), ("Delay", "* * 100")]);
    assert_eq!(from_settings.specifications().len(), 1);
    assert_eq!(from_settings.get("Delay"), Some("* * 100"));
}

#[test]
fn test_write_then_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work").join("UnreliableTransportSettings.ini");

    assert!(UnreliableTransportSettings::load(&path).unwrap().is_empty());

    let written = rules(&[("Drop", "* * 0.1"), ("Delay", "N1 N2 250")]);
    written.write(&path).unwrap();
    assert_eq!(UnreliableTransportSettings::load(&path).unwrap(), written);
}

// ============================================================================
// Endpoints Registry
// ============================================================================

fn node_type_rows() -> Vec<Endpoints> {
    let manifest = ClusterManifest::from_json(
        r#"{
            "name": "C", "version": "1",
            "infrastructure": { "kind": "Linux" },
            "nodeTypes": [
                { "name": "Front", "endpoints": {
                    "clientConnectionEndpoint": { "port": 19000 },
                    "leaseDriverEndpoint": { "port": 19002 },
                    "clusterConnectionEndpoint": { "port": 19001 },
                    "applicationEndpoints": { "startPort": 30000, "endPort": 30999 } } },
                { "name": "Back", "endpoints": {
                    "clusterConnectionEndpoint": { "port": 20001 },
                    "defaultReplicatorEndpoint": { "port": 20005 } } }
            ]
        }"#,
    )
    .unwrap();
    manifest.node_types.iter().map(Endpoints::from_node_type).collect()
}

#[test]
fn test_endpoints_round_trip() {
    let rows = node_type_rows();
    let text = endpoints::render(&rows).unwrap();
    assert!(text.starts_with("Role,ClientConnection,LeaseDriver,"));
    assert!(text.contains("Front,19000,19002,19001,,,,,30000,30999"));
    assert!(text.contains("Back,,,20001,20005,,,,,"));
    assert_eq!(endpoints::parse(&text).unwrap(), rows);
}

#[test]
fn test_endpoints_parse_skips_spaced_header_and_blank_lines() {
    let parsed = endpoints::parse(
        "Role, ClientConnection, LeaseDriver, ClusterConnection, DefaultReplicator, NamingReplicator, FMReplicator, CMReplicator, ApplicationStart, ApplicationEnd\n\nFront,19000,,19001,,,,,,\n",
    )
    .unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].role, "Front");
    assert_eq!(parsed[0].client_connection, "19000");
}

#[test]
fn test_endpoints_whitespace_in_fields_survives_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Endpoints.csv");
    let mut rows = node_type_rows();
    rows[0].role = " Front End ".to_string();
    rows[1].cluster_connection = "20001 ".to_string();
    endpoints::write(&path, &rows).unwrap();
    assert_eq!(endpoints::read(&path).unwrap(), rows);
}

#[test]
fn test_endpoints_field_with_separator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Endpoints.csv");

    let mut rows = node_type_rows();
    rows[0].role = "Front,Extra".to_string();
    assert!(matches!(
        endpoints::write(&path, &rows),
        Err(DeployerError::Serialization(_))
    ));

    let mut rows = node_type_rows();
    rows[1].role = "Back\r\nInjected".to_string();
    assert!(endpoints::render(&rows).is_err());
    assert!(!path.exists());
}

#[test]
fn test_endpoints_wrong_field_count() {
    assert!(endpoints::parse("Front,19000\n").is_err());
}

#[test]
fn test_endpoints_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Endpoints.csv");
    let rows = node_type_rows();
    endpoints::write(&path, &rows).unwrap();
    assert_eq!(endpoints::read(&path).unwrap(), rows);
}
