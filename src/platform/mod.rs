//! Host platform capabilities.
//!
//! Everything the deployer does to the machine outside the data root goes
//! through one of these traits. Operations receive a `&dyn Platform`, which
//! bundles all of them:
//!
//! - [`ServiceManager`]: install, modify and remove the host service.
//! - [`FirewallManager`]: inbound rules for the node endpoints.
//! - [`DirectoryIdentityManager`]: service principal names.
//! - [`NetworkManager`]: container networks and container DNS.
//! - [`PortRangeManager`]: the OS dynamic port range.
//! - [`HostEnvironment`]: machine-wide key/value environment.
//! - [`ProcessLauncher`]: runs an external program to completion.
//!
//! [`linux::LinuxPlatform`] drives the usual Linux tools. With the
//! `test-utilities` feature, [`recording::RecordingPlatform`] records every
//! call instead.
//!
//! Platform failures are never retried; callers log them with context and
//! return them.

pub mod linux;
#[cfg(any(test, feature = "test-utilities"))]
pub mod recording;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::DeployerResult;
use crate::ports::PortRangeReduction;

/// Capability names, used as metric labels and in error context.
pub mod capability {
    pub const SERVICE: &str = "service";
    pub const FIREWALL: &str = "firewall";
    pub const DIRECTORY: &str = "directory";
    pub const NETWORK: &str = "network";
    pub const PORT_RANGE: &str = "port_range";
    pub const ENVIRONMENT: &str = "environment";
    pub const PROCESS: &str = "process";
}

// =============================================================================
// Value types
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartType {
    #[default]
    Automatic,
    Manual,
    Disabled,
}

/// Account the host service runs as.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub account_name: String,
    pub account_type: String,
    pub password: Option<String>,
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("account_name", &self.account_name)
            .field("account_type", &self.account_type)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub binary_path: PathBuf,
    pub start_type: StartType,
    pub credentials: Option<ServiceCredentials>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound allow rule for a port or an inclusive port range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub protocol: TransportProtocol,
    pub start_port: u16,
    pub end_port: u16,
}

impl FirewallRule {
    /// Rule `"<prefix> <endpoint> (<protocol>-In)"` for a single port.
    pub fn inbound(prefix: &str, endpoint: &str, protocol: TransportProtocol, port: u16) -> Self {
        Self::inbound_range(prefix, endpoint, protocol, port, port)
    }

    pub fn inbound_range(
        prefix: &str,
        endpoint: &str,
        protocol: TransportProtocol,
        start_port: u16,
        end_port: u16,
    ) -> Self {
        Self {
            name: format!("{prefix} {endpoint} ({protocol}-In)"),
            protocol,
            start_port,
            end_port,
        }
    }

    pub fn is_range(&self) -> bool {
        self.start_port != self.end_port
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// Bridged network with outbound access.
    Container,
    /// Network without outbound access.
    Isolated,
}

// =============================================================================
// Capabilities
// =============================================================================

pub trait ServiceManager: Send + Sync {
    /// Install the service, or update it in place if it already exists.
    fn install_or_update_service(&self, spec: &ServiceSpec) -> DeployerResult<()>;

    /// Stop and remove the service. Removing an absent service succeeds.
    fn remove_service(&self, name: &str) -> DeployerResult<()>;
}

pub trait FirewallManager: Send + Sync {
    /// Add every rule that is not already present.
    fn ensure_firewall_rules(&self, rules: &[FirewallRule]) -> DeployerResult<()>;

    /// Remove every rule whose name starts with `prefix`.
    fn remove_firewall_rules(&self, prefix: &str) -> DeployerResult<()>;
}

pub trait DirectoryIdentityManager: Send + Sync {
    fn register_spn(&self, spn: &str) -> DeployerResult<()>;
    fn unregister_spn(&self, spn: &str) -> DeployerResult<()>;
}

pub trait NetworkManager: Send + Sync {
    fn setup_network(&self, name: &str, kind: NetworkKind) -> DeployerResult<()>;
    fn cleanup_network(&self, name: &str) -> DeployerResult<()>;
    fn setup_dns(&self) -> DeployerResult<()>;
    fn cleanup_dns(&self) -> DeployerResult<()>;
}

pub trait PortRangeManager: Send + Sync {
    fn reduce_dynamic_port_range(&self, reduction: &PortRangeReduction) -> DeployerResult<()>;
}

pub trait HostEnvironment: Send + Sync {
    fn set_environment_value(&self, key: &str, value: &str) -> DeployerResult<()>;
    fn environment_value(&self, key: &str) -> DeployerResult<Option<String>>;
    fn remove_environment_value(&self, key: &str) -> DeployerResult<()>;
}

pub trait ProcessLauncher: Send + Sync {
    /// Run `program` and wait for it; a non-zero exit is an error.
    fn launch(&self, program: &Path, args: &[String]) -> DeployerResult<()>;
}

/// All capabilities together.
pub trait Platform:
    ServiceManager
    + FirewallManager
    + DirectoryIdentityManager
    + NetworkManager
    + PortRangeManager
    + HostEnvironment
    + ProcessLauncher
{
}

impl<T> Platform for T where
    T: ServiceManager
        + FirewallManager
        + DirectoryIdentityManager
        + NetworkManager
        + PortRangeManager
        + HostEnvironment
        + ProcessLauncher
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firewall_rule_name() {
        let rule = FirewallRule::inbound("ClusterNode", "LeaseDriver", TransportProtocol::Tcp, 19001);
        assert_eq!(rule.name, "ClusterNode LeaseDriver (TCP-In)");
        assert!(!rule.is_range());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = ServiceCredentials {
            account_name: "svc".to_string(),
            account_type: "DomainUser".to_string(),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
