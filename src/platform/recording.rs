//! In-memory platform that records every capability call.
//!
//! Available during unit tests and with the `test-utilities` feature:
//!
//! ```toml
//! [dev-dependencies]
//! nodeconf = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! Failures can be injected per capability with
//! [`RecordingPlatform::fail_capability`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    DirectoryIdentityManager, FirewallManager, FirewallRule, HostEnvironment, NetworkKind,
    NetworkManager, PortRangeManager, ProcessLauncher, ServiceManager, ServiceSpec, capability,
};
use crate::error::{DeployerError, DeployerResult};
use crate::ports::PortRangeReduction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    InstallService(ServiceSpec),
    RemoveService(String),
    EnsureFirewallRules(Vec<FirewallRule>),
    RemoveFirewallRules(String),
    RegisterSpn(String),
    UnregisterSpn(String),
    SetupNetwork { name: String, kind: NetworkKind },
    CleanupNetwork(String),
    SetupDns,
    CleanupDns,
    ReduceDynamicPortRange(PortRangeReduction),
    SetEnvironment { key: String, value: String },
    RemoveEnvironment(String),
    Launch { program: PathBuf, args: Vec<String> },
}

#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    environment: Mutex<BTreeMap<String, String>>,
    failing: Mutex<HashSet<&'static str>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Make every later call of `capability` fail (see [`capability`]).
    pub fn fail_capability(&self, capability: &'static str) {
        lock(&self.failing).insert(capability);
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        lock(&self.environment).clone()
    }

    fn record(&self, capability: &'static str, call: PlatformCall) -> DeployerResult<()> {
        if lock(&self.failing).contains(capability) {
            return Err(DeployerError::platform(
                capability,
                format!("injected failure for {call:?}"),
            ));
        }
        lock(&self.calls).push(call);
        Ok(())
    }
}

impl ServiceManager for RecordingPlatform {
    fn install_or_update_service(&self, spec: &ServiceSpec) -> DeployerResult<()> {
        self.record(capability::SERVICE, PlatformCall::InstallService(spec.clone()))
    }

    fn remove_service(&self, name: &str) -> DeployerResult<()> {
        self.record(capability::SERVICE, PlatformCall::RemoveService(name.to_string()))
    }
}

impl FirewallManager for RecordingPlatform {
    fn ensure_firewall_rules(&self, rules: &[FirewallRule]) -> DeployerResult<()> {
        self.record(
            capability::FIREWALL,
            PlatformCall::EnsureFirewallRules(rules.to_vec()),
        )
    }

    fn remove_firewall_rules(&self, prefix: &str) -> DeployerResult<()> {
        self.record(
            capability::FIREWALL,
            PlatformCall::RemoveFirewallRules(prefix.to_string()),
        )
    }
}

impl DirectoryIdentityManager for RecordingPlatform {
    fn register_spn(&self, spn: &str) -> DeployerResult<()> {
        self.record(capability::DIRECTORY, PlatformCall::RegisterSpn(spn.to_string()))
    }

    fn unregister_spn(&self, spn: &str) -> DeployerResult<()> {
        self.record(capability::DIRECTORY, PlatformCall::UnregisterSpn(spn.to_string()))
    }
}

impl NetworkManager for RecordingPlatform {
    fn setup_network(&self, name: &str, kind: NetworkKind) -> DeployerResult<()> {
        self.record(
            capability::NETWORK,
            PlatformCall::SetupNetwork {
                name: name.to_string(),
                kind,
            },
        )
    }

    fn cleanup_network(&self, name: &str) -> DeployerResult<()> {
        self.record(capability::NETWORK, PlatformCall::CleanupNetwork(name.to_string()))
    }

    fn setup_dns(&self) -> DeployerResult<()> {
        self.record(capability::NETWORK, PlatformCall::SetupDns)
    }

    fn cleanup_dns(&self) -> DeployerResult<()> {
        self.record(capability::NETWORK, PlatformCall::CleanupDns)
    }
}

impl PortRangeManager for RecordingPlatform {
    fn reduce_dynamic_port_range(&self, reduction: &PortRangeReduction) -> DeployerResult<()> {
        self.record(
            capability::PORT_RANGE,
            PlatformCall::ReduceDynamicPortRange(*reduction),
        )
    }
}

impl HostEnvironment for RecordingPlatform {
    fn set_environment_value(&self, key: &str, value: &str) -> DeployerResult<()> {
        self.record(
            capability::ENVIRONMENT,
            PlatformCall::SetEnvironment {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?;
        lock(&self.environment).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn environment_value(&self, key: &str) -> DeployerResult<Option<String>> {
        Ok(lock(&self.environment).get(key).cloned())
    }

    fn remove_environment_value(&self, key: &str) -> DeployerResult<()> {
        self.record(
            capability::ENVIRONMENT,
            PlatformCall::RemoveEnvironment(key.to_string()),
        )?;
        lock(&self.environment).remove(key);
        Ok(())
    }
}

impl ProcessLauncher for RecordingPlatform {
    fn launch(&self, program: &Path, args: &[String]) -> DeployerResult<()> {
        self.record(
            capability::PROCESS,
            PlatformCall::Launch {
                program: program.to_path_buf(),
                args: args.to_vec(),
            },
        )
    }
}
