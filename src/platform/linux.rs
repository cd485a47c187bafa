//! Capabilities backed by the standard Linux tooling.
//!
//! | Capability | Tool |
//! |------------|------|
//! | service | systemd unit file + `systemctl` |
//! | firewall | `iptables`, rules tagged with a comment carrying the rule name |
//! | directory | `msktutil` |
//! | network | `docker network`, `resolvectl` |
//! | port range | `sysctl net.ipv4.ip_local_port_range` |
//! | environment | JSON file |
//!
//! Commands go through a [`CommandRunner`] so the command lines can be
//! checked without touching the host.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::{
    DirectoryIdentityManager, FirewallManager, FirewallRule, HostEnvironment, NetworkKind,
    NetworkManager, PortRangeManager, ProcessLauncher, ServiceManager, ServiceSpec, StartType,
    capability,
};
use crate::config::DeployerConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::ports::PortRangeReduction;

const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
const DEFAULT_DNS_INTERFACE: &str = "docker0";
const DNS_RESOLVER_ADDRESS: &str = "127.0.0.1";
const FIREWALL_CHAIN: &str = "INPUT";

/// Executes external programs.
pub trait CommandRunner: Send + Sync {
    /// Run to completion; non-zero exit is a platform error. Returns stdout.
    fn run(&self, capability: &'static str, program: &str, args: &[String]) -> DeployerResult<String>;

    /// Run to completion with output discarded; non-zero exit is a platform error.
    fn execute(&self, capability: &'static str, program: &Path, args: &[String]) -> DeployerResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, capability: &'static str, program: &str, args: &[String]) -> DeployerResult<String> {
        debug!(program, ?args, "Running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| DeployerError::platform(capability, format!("{program}: {e}")))?;
        if !output.status.success() {
            return Err(DeployerError::platform(
                capability,
                format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn execute(&self, capability: &'static str, program: &Path, args: &[String]) -> DeployerResult<()> {
        debug!(program = %program.display(), ?args, "Launching process");
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| DeployerError::platform(capability, format!("{}: {e}", program.display())))?;
        if !status.success() {
            return Err(DeployerError::platform(
                capability,
                format!("{} exited with {status}", program.display()),
            ));
        }
        debug!(program = %program.display(), "Process exited");
        Ok(())
    }
}

fn args<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub struct LinuxPlatform {
    runner: Box<dyn CommandRunner>,
    unit_dir: PathBuf,
    environment_file: PathBuf,
    dns_interface: String,
}

impl LinuxPlatform {
    pub fn new(config: &DeployerConfig) -> Self {
        Self::with_runner(
            Box::new(SystemCommandRunner),
            PathBuf::from(SYSTEMD_UNIT_DIR),
            config.environment_file.clone(),
        )
    }

    pub fn with_runner(
        runner: Box<dyn CommandRunner>,
        unit_dir: PathBuf,
        environment_file: PathBuf,
    ) -> Self {
        Self {
            runner,
            unit_dir,
            environment_file,
            dns_interface: DEFAULT_DNS_INTERFACE.to_string(),
        }
    }

    fn unit_name(name: &str) -> String {
        format!("{name}.service")
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(Self::unit_name(name))
    }

    fn systemctl(&self, values: &[&str]) -> DeployerResult<String> {
        let args: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.runner.run(capability::SERVICE, "systemctl", &args)
    }

    fn read_environment(&self) -> DeployerResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.environment_file) {
            Ok(json) if json.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(DeployerError::io(&self.environment_file, e)),
        }
    }

    fn write_environment(&self, values: &BTreeMap<String, String>) -> DeployerResult<()> {
        if let Some(parent) = self.environment_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.environment_file, json)
            .map_err(|e| DeployerError::io(&self.environment_file, e))
    }
}

/// systemd unit for the host service. Passwords cannot be expressed in a
/// unit; only the account name is used.
pub fn render_unit(spec: &ServiceSpec) -> String {
    let mut unit = String::new();
    let _ = writeln!(unit, "[Unit]");
    let _ = writeln!(unit, "Description=Cluster node host ({})", spec.name);
    let _ = writeln!(unit, "After=network-online.target");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Service]");
    let _ = writeln!(unit, "ExecStart={}", spec.binary_path.display());
    let _ = writeln!(unit, "Restart=on-failure");
    if let Some(credentials) = &spec.credentials {
        if !credentials.account_name.trim().is_empty() {
            let _ = writeln!(unit, "User={}", credentials.account_name);
        }
    }
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Install]");
    let _ = writeln!(unit, "WantedBy=multi-user.target");
    unit
}

impl ServiceManager for LinuxPlatform {
    fn install_or_update_service(&self, spec: &ServiceSpec) -> DeployerResult<()> {
        let path = self.unit_path(&spec.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }
        std::fs::write(&path, render_unit(spec)).map_err(|e| DeployerError::io(&path, e))?;
        if spec.credentials.as_ref().is_some_and(|c| c.password.is_some()) {
            debug!(service = %spec.name, "Service password is not used by systemd units");
        }

        self.systemctl(&["daemon-reload"])?;
        let unit = Self::unit_name(&spec.name);
        match spec.start_type {
            StartType::Automatic => self.systemctl(&["enable", unit.as_str()])?,
            StartType::Manual => self.systemctl(&["disable", unit.as_str()])?,
            StartType::Disabled => self.systemctl(&["mask", unit.as_str()])?,
        };
        info!(service = %spec.name, unit = %path.display(), "Host service installed");
        Ok(())
    }

    fn remove_service(&self, name: &str) -> DeployerResult<()> {
        let path = self.unit_path(name);
        if !path.exists() {
            debug!(service = name, "Host service not installed");
            return Ok(());
        }
        let unit = Self::unit_name(name);
        if let Err(e) = self.systemctl(&["disable", "--now", unit.as_str()]) {
            warn!(service = name, error = %e, "Failed to stop host service");
        }
        std::fs::remove_file(&path).map_err(|e| DeployerError::io(&path, e))?;
        self.systemctl(&["daemon-reload"])?;
        info!(service = name, "Host service removed");
        Ok(())
    }
}

fn rule_args(rule: &FirewallRule) -> Vec<String> {
    let ports = if rule.is_range() {
        format!("{}:{}", rule.start_port, rule.end_port)
    } else {
        rule.start_port.to_string()
    };
    let protocol = rule.protocol.as_str().to_ascii_lowercase();
    args([
        FIREWALL_CHAIN,
        "-p",
        protocol.as_str(),
        "--dport",
        ports.as_str(),
        "-m",
        "comment",
        "--comment",
        rule.name.as_str(),
        "-j",
        "ACCEPT",
    ])
}

/// Split an `iptables -S` line into arguments, honouring double quotes.
fn split_rule_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_token = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

fn rule_comment(tokens: &[String]) -> Option<&str> {
    tokens
        .iter()
        .position(|t| t == "--comment")
        .and_then(|i| tokens.get(i + 1))
        .map(String::as_str)
}

impl FirewallManager for LinuxPlatform {
    fn ensure_firewall_rules(&self, rules: &[FirewallRule]) -> DeployerResult<()> {
        for rule in rules {
            let rule_args = rule_args(rule);
            let mut check = vec!["-C".to_string()];
            check.extend(rule_args.iter().cloned());
            if self.runner.run(capability::FIREWALL, "iptables", &check).is_ok() {
                debug!(rule = %rule.name, "Firewall rule already present");
                continue;
            }
            let mut append = vec!["-A".to_string()];
            append.extend(rule_args);
            self.runner.run(capability::FIREWALL, "iptables", &append)?;
            info!(rule = %rule.name, "Firewall rule added");
        }
        Ok(())
    }

    fn remove_firewall_rules(&self, prefix: &str) -> DeployerResult<()> {
        let listing = self
            .runner
            .run(capability::FIREWALL, "iptables", &args(["-S", FIREWALL_CHAIN]))?;
        for line in listing.lines() {
            let mut tokens = split_rule_line(line);
            if tokens.first().map(String::as_str) != Some("-A")
                || !rule_comment(&tokens).is_some_and(|c| c.starts_with(prefix))
            {
                continue;
            }
            tokens[0] = "-D".to_string();
            self.runner.run(capability::FIREWALL, "iptables", &tokens)?;
            info!(rule = rule_comment(&tokens).unwrap_or_default(), "Firewall rule removed");
        }
        Ok(())
    }
}

impl DirectoryIdentityManager for LinuxPlatform {
    fn register_spn(&self, spn: &str) -> DeployerResult<()> {
        self.runner
            .run(capability::DIRECTORY, "msktutil", &args(["--update", "--service", spn]))?;
        info!(spn, "Service principal name registered");
        Ok(())
    }

    fn unregister_spn(&self, spn: &str) -> DeployerResult<()> {
        self.runner
            .run(capability::DIRECTORY, "msktutil", &args(["--remove-service", spn]))?;
        info!(spn, "Service principal name removed");
        Ok(())
    }
}

impl NetworkManager for LinuxPlatform {
    fn setup_network(&self, name: &str, kind: NetworkKind) -> DeployerResult<()> {
        if self
            .runner
            .run(capability::NETWORK, "docker", &args(["network", "inspect", name]))
            .is_ok()
        {
            debug!(network = name, "Network already exists");
            return Ok(());
        }
        let mut create = args(["network", "create", "--driver", "bridge"]);
        if kind == NetworkKind::Isolated {
            create.push("--internal".to_string());
        }
        create.push(name.to_string());
        self.runner.run(capability::NETWORK, "docker", &create)?;
        info!(network = name, ?kind, "Network created");
        Ok(())
    }

    fn cleanup_network(&self, name: &str) -> DeployerResult<()> {
        if self
            .runner
            .run(capability::NETWORK, "docker", &args(["network", "inspect", name]))
            .is_err()
        {
            debug!(network = name, "Network not present");
            return Ok(());
        }
        self.runner
            .run(capability::NETWORK, "docker", &args(["network", "rm", name]))?;
        info!(network = name, "Network removed");
        Ok(())
    }

    fn setup_dns(&self) -> DeployerResult<()> {
        self.runner.run(
            capability::NETWORK,
            "resolvectl",
            &args(["dns", self.dns_interface.as_str(), DNS_RESOLVER_ADDRESS]),
        )?;
        Ok(())
    }

    fn cleanup_dns(&self) -> DeployerResult<()> {
        self.runner.run(
            capability::NETWORK,
            "resolvectl",
            &args(["revert", self.dns_interface.as_str()]),
        )?;
        Ok(())
    }
}

impl PortRangeManager for LinuxPlatform {
    fn reduce_dynamic_port_range(&self, reduction: &PortRangeReduction) -> DeployerResult<()> {
        if reduction.count == 0 {
            warn!(start_port = reduction.start_port, "Empty dynamic port range, skipping");
            return Ok(());
        }
        let end = u32::from(reduction.start_port)
            .saturating_add(reduction.count - 1)
            .min(u32::from(u16::MAX));
        let value = format!(
            "net.ipv4.ip_local_port_range={} {end}",
            reduction.start_port
        );
        self.runner
            .run(capability::PORT_RANGE, "sysctl", &args(["-w", value.as_str()]))?;
        info!(start_port = reduction.start_port, end_port = end, "Dynamic port range set");
        Ok(())
    }
}

impl HostEnvironment for LinuxPlatform {
    fn set_environment_value(&self, key: &str, value: &str) -> DeployerResult<()> {
        let mut values = self.read_environment()?;
        values.insert(key.to_string(), value.to_string());
        self.write_environment(&values)
    }

    fn environment_value(&self, key: &str) -> DeployerResult<Option<String>> {
        Ok(self.read_environment()?.remove(key))
    }

    fn remove_environment_value(&self, key: &str) -> DeployerResult<()> {
        let mut values = self.read_environment()?;
        if values.remove(key).is_some() {
            self.write_environment(&values)?;
        }
        Ok(())
    }
}

impl ProcessLauncher for LinuxPlatform {
    fn launch(&self, program: &Path, args: &[String]) -> DeployerResult<()> {
        self.runner.execute(capability::PROCESS, program, args)
    }
}
