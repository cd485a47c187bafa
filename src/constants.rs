//! Centralized section names, parameter names, and deployment constants.
//!
//! The settings vocabulary below is consumed by the node runtime and by
//! external tooling that parses the files the deployer writes. Renaming any of
//! these values is a breaking change for those consumers.
//!
//! # Categories
//!
//! - **Section Names**: well-known settings sections
//! - **Parameter Names**: parameters read or produced by the resolution pipeline
//! - **Layout**: file and directory names under the data root
//! - **Defaults**: fallback values for versions, networks, and retries

// =============================================================================
// Section Names
// =============================================================================

/// Seed node votes, keyed by node name.
pub const SECTION_VOTES: &str = "Votes";

/// Client connection endpoints of the seed nodes, keyed by node name.
pub const SECTION_SEED_NODE_CLIENT_CONNECTION_ADDRESSES: &str =
    "SeedNodeClientConnectionAddresses";

pub const SECTION_SECURITY: &str = "Security";

/// Diagnostics file store; drives the monitoring agent derivation.
pub const SECTION_DIAGNOSTIC_FILE_STORE: &str = "DiagnosticFileStore";

pub const SECTION_MANAGEMENT: &str = "Management";

/// Fault-injection rules for the cluster's internal transport.
pub const SECTION_UNRELIABLE_TRANSPORT: &str = "UnreliableTransport";

/// Per-node identity and endpoints, generated for every hosted node.
pub const SECTION_FABRIC_NODE: &str = "FabricNode";

pub const SECTION_NODE_PROPERTIES: &str = "NodeProperties";
pub const SECTION_NODE_CAPACITIES: &str = "NodeCapacities";
pub const SECTION_NODE_DOMAIN_IDS: &str = "NodeDomainIds";
pub const SECTION_SETUP: &str = "Setup";
pub const SECTION_RUN_AS: &str = "RunAs";
pub const SECTION_HOSTING: &str = "Hosting";
pub const SECTION_DNS_SERVICE: &str = "DnsService";

/// Every parameter value in this section is a directory created on configure.
pub const SECTION_LOGICAL_DIRECTORIES: &str = "LogicalDirectories";

// =============================================================================
// Parameter Names
// =============================================================================

/// Security parameter names are built as `Settings{X509StoreNamePattern}`.
pub const X509_STORE_NAME_PATTERN: &str = "X509StoreName";
pub const PARAM_SETTINGS_X509_STORE_NAME: &str = "SettingsX509StoreName";

pub const PARAM_IS_APP_LOG_COLLECTION_ENABLED: &str = "IsAppLogCollectionEnabled";
pub const PARAM_STORE_CONNECTION_STRING: &str = "StoreConnectionString";
pub const PARAM_UPLOAD_INTERVAL_IN_MINUTES: &str = "UploadIntervalInMinutes";
pub const PARAM_APP_LOG_DIRECTORY_QUOTA_IN_MB: &str = "AppLogDirectoryQuotaInMB";

pub const PARAM_MONITORING_AGENT_STORAGE_ACCOUNT: &str = "MonitoringAgentStorageAccount";
pub const PARAM_MONITORING_AGENT_TRANSFER_INTERVAL: &str = "MonitoringAgentTransferInterval";
pub const PARAM_MONITORING_AGENT_DIRECTORY_QUOTA: &str = "MonitoringAgentDirectoryQuota";

pub const PARAM_START_DYNAMIC_PORT_RANGE: &str = "StartDynamicPortRange";
pub const PARAM_END_DYNAMIC_PORT_RANGE: &str = "EndDynamicPortRange";
pub const PARAM_START_APPLICATION_PORT_RANGE: &str = "StartApplicationPortRange";
pub const PARAM_END_APPLICATION_PORT_RANGE: &str = "EndApplicationPortRange";

pub const PARAM_INSTANCE_NAME: &str = "InstanceName";
pub const PARAM_NODE_TYPE: &str = "NodeType";
pub const PARAM_IP_ADDRESS_OR_FQDN: &str = "IPAddressOrFQDN";
pub const PARAM_NODE_FAULT_DOMAIN_ID: &str = "NodeFaultDomainId";
pub const PARAM_UPGRADE_DOMAIN_ID: &str = "UpgradeDomainId";
pub const PARAM_NODE_FAULT_DOMAIN_IDS: &str = "NodeFaultDomainIds";
pub const PARAM_WORKING_DIR: &str = "WorkingDir";
pub const PARAM_IS_SCALE_MIN: &str = "IsScaleMin";
pub const PARAM_NODE_VERSION: &str = "NodeVersion";
pub const PARAM_CLIENT_CONNECTION_ADDRESS: &str = "ClientConnectionAddress";
pub const PARAM_NODE_ADDRESS: &str = "NodeAddress";
pub const PARAM_LEASE_AGENT_ADDRESS: &str = "LeaseAgentAddress";
pub const PARAM_RUNTIME_SERVICE_ADDRESS: &str = "RuntimeServiceAddress";
pub const PARAM_CLUSTER_MANAGER_REPLICATOR_ADDRESS: &str = "ClusterManagerReplicatorAddress";
pub const PARAM_NAMING_REPLICATOR_ADDRESS: &str = "NamingReplicatorAddress";
pub const PARAM_FAILOVER_MANAGER_REPLICATOR_ADDRESS: &str = "FailoverManagerReplicatorAddress";
pub const PARAM_HTTP_GATEWAY_LISTEN_ADDRESS: &str = "HttpGatewayListenAddress";

pub const PARAM_FABRIC_DATA_ROOT: &str = "FabricDataRoot";
pub const PARAM_FABRIC_LOG_ROOT: &str = "FabricLogRoot";

pub const PARAM_RUN_AS_ACCOUNT_NAME: &str = "RunAsAccountName";
pub const PARAM_RUN_AS_ACCOUNT_TYPE: &str = "RunAsAccountType";
pub const PARAM_RUN_AS_PASSWORD: &str = "RunAsPassword";

pub const PARAM_CLUSTER_CREDENTIAL_TYPE: &str = "ClusterCredentialType";
pub const PARAM_CLUSTER_SPN: &str = "ClusterSpn";

pub const PARAM_CONTAINER_NETWORK_NAME: &str = "ContainerNetworkName";
pub const PARAM_ISOLATED_NETWORK_NAME: &str = "IsolatedNetworkName";
pub const PARAM_IS_ENABLED: &str = "IsEnabled";

/// Vote type prefix of seed-node votes (`SeedNode,<address>:<port>`).
pub const SEED_NODE_VOTE_TYPE: &str = "SeedNode";

/// The only vote type operators may declare directly in the `Votes` section.
pub const SQL_VOTE_TYPE: &str = "SQL";

// =============================================================================
// Host Environment Keys (registry equivalents)
// =============================================================================

pub const ENV_KEY_FABRIC_ROOT: &str = "FabricRoot";
pub const ENV_KEY_FABRIC_BIN_ROOT: &str = "FabricBinRoot";
pub const ENV_KEY_FABRIC_CODE_PATH: &str = "FabricCodePath";
pub const ENV_KEY_FABRIC_DATA_ROOT: &str = "FabricDataRoot";
pub const ENV_KEY_FABRIC_LOG_ROOT: &str = "FabricLogRoot";

/// Binary directory relative to the fabric root.
pub const FABRIC_BIN_RELATIVE_PATH: &str = "bin";

/// Code directory relative to the fabric root.
pub const FABRIC_CODE_RELATIVE_PATH: &str = "bin/Fabric/Fabric.Code";

/// Host process binary inside the bin root.
pub const HOST_BINARY_NAME: &str = "FabricHost";

// =============================================================================
// Layout
// =============================================================================

pub const HOST_SETTINGS_FILE: &str = "HostSettings.json";
pub const SEED_INFO_FILE: &str = "SeedInfo.ini";
pub const SEED_INFO_HEADER: &str = "[SeedNodes]";
pub const INFRASTRUCTURE_MANIFEST_FILE: &str = "InfrastructureManifest.json";
pub const ENDPOINTS_FILE: &str = "Endpoints.csv";
pub const TARGET_INFORMATION_FILE: &str = "TargetInformation.json";
pub const NODE_FABRIC_DIR: &str = "Fabric";
pub const FABRIC_DATA_DIR: &str = "Fabric.Data";
pub const NODE_WORK_DIR: &str = "work";
pub const CONFIG_DIR_PREFIX: &str = "Fabric.Config";
pub const SETTINGS_FILE: &str = "Settings.json";
pub const CLUSTER_MANIFEST_CURRENT_FILE: &str = "ClusterManifest.current.json";
pub const CLUSTER_MANIFEST_FILE_PREFIX: &str = "ClusterManifest";
pub const PACKAGE_CURRENT_FILE: &str = "Fabric.Package.current.json";
pub const PACKAGE_FILE_PREFIX: &str = "Fabric.Package";
pub const UNRELIABLE_TRANSPORT_FILE: &str = "UnreliableTransportSettings.ini";

/// Suffix of the sibling file used for exclusive acquisition of persisted records.
pub const LOCK_FILE_SUFFIX: &str = "lock";

// =============================================================================
// Defaults
// =============================================================================

/// Instance id a node falls back to when its binaries change generation.
pub const DEFAULT_INSTANCE_ID: u64 = 0;

/// Code version assumed when neither the caller nor a package record names one.
pub const DEFAULT_CODE_VERSION: &str = "0.0.0.0";

/// Cluster credential type that requires a registered service principal name.
pub const WINDOWS_CREDENTIAL_TYPE: &str = "Windows";

pub const DEFAULT_CONTAINER_NETWORK_NAME: &str = "servicefabric_network";
pub const DEFAULT_ISOLATED_NETWORK_NAME: &str = "servicefabric_isolated";

pub const DEFAULT_SERVICE_NAME: &str = "nodeconf-host";
pub const DEFAULT_FIREWALL_RULE_PREFIX: &str = "ClusterNode";

/// DNS port opened by the docker DNS setup.
pub const DNS_PORT: u16 = 53;

/// Default number of attempts to acquire a persisted record exclusively.
pub const DEFAULT_LOCK_RETRY_COUNT: usize = 10;

/// Base delay of the linear lock backoff (attempt n waits n * base).
pub const DEFAULT_LOCK_RETRY_BASE_DELAY_MS: u64 = 100;

/// Overall budget of the reachability polling loop.
pub const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 60;

/// Pause between reachability attempts.
pub const DEFAULT_REACHABILITY_INTERVAL_MS: u64 = 1_000;

/// Header columns of the endpoints registry file, in order.
pub const ENDPOINTS_HEADER: [&str; 10] = [
    "Role",
    "ClientConnection",
    "LeaseDriver",
    "ClusterConnection",
    "DefaultReplicator",
    "NamingReplicator",
    "FMReplicator",
    "CMReplicator",
    "ApplicationStart",
    "ApplicationEnd",
];
