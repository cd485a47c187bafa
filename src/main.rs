use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use nodeconf::infrastructure::LocalMachineIdentity;
use nodeconf::metrics::{gather_text, init_metrics};
use nodeconf::platform::linux::LinuxPlatform;
use nodeconf::reachability::TcpProbe;
use nodeconf::telemetry::{LogFormat, init_logging};
use nodeconf::{Deployer, DeployerConfig, DeployerError, DeploymentOperation, DeploymentParameters};

#[derive(Parser, Debug)]
#[command(name = "nodeconf")]
#[command(about = "Configure this machine as a cluster node", long_about = None)]
struct Cli {
    /// Operation to perform (e.g. Create, Update, Remove, Rollback)
    operation: DeploymentOperation,

    #[arg(long)]
    cluster_manifest: Option<PathBuf>,

    #[arg(long)]
    infrastructure_manifest: Option<PathBuf>,

    /// Manifest to check with `Validate`
    #[arg(long)]
    proposed_manifest: Option<PathBuf>,

    /// Overrides NODECONF_DATA_ROOT
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Restrict the operation to one node
    #[arg(long)]
    node_name: Option<String>,

    #[arg(long)]
    instance_id: Option<u64>,

    #[arg(long)]
    target_code_version: Option<String>,

    #[arg(long)]
    current_code_version: Option<String>,

    /// Wait until this URI is reachable before deploying
    #[arg(long)]
    package_source: Option<String>,

    /// Overrides NODECONF_TARGET_INFO_PATH
    #[arg(long)]
    target_info: Option<PathBuf>,

    /// pretty or json; defaults to LOG_FORMAT
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Write Prometheus metrics here when the operation ends
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl Cli {
    fn into_parameters(self, mut config: DeployerConfig) -> DeploymentParameters {
        if let Some(data_root) = self.data_root {
            config.data_root = data_root;
        }
        if let Some(target_info) = self.target_info {
            config.target_info_path = Some(target_info);
        }

        let mut params = DeploymentParameters::new(self.operation, config);
        params.cluster_manifest = self.cluster_manifest;
        params.infrastructure_manifest = self.infrastructure_manifest;
        params.proposed_manifest = self.proposed_manifest;
        params.node_name = self.node_name;
        params.instance_id = self.instance_id;
        params.target_code_version = self.target_code_version;
        params.current_code_version = self.current_code_version;
        params.package_source = self.package_source;
        params
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let metrics_file = cli.metrics_file.clone();

    let params = cli.into_parameters(DeployerConfig::from_env()?);
    if let Err(errors) = params.config.validate() {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(DeployerError::Config(errors.join("; ")).into());
    }

    init_metrics();
    let identity = LocalMachineIdentity::resolve();
    let platform = LinuxPlatform::new(&params.config);
    let probe = TcpProbe::default();
    let deployer = Deployer::new(&params, &platform, &identity, &probe);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(deployer.run());

    if let Some(path) = metrics_file {
        match gather_text() {
            Ok(text) => {
                if let Err(e) = std::fs::write(&path, text) {
                    error!(path = %path.display(), error = %e, "Failed to write metrics");
                }
            }
            Err(e) => error!(error = %e, "Failed to gather metrics"),
        }
    }

    let outcome = result?;
    info!(?outcome, "Done");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.log_format.unwrap_or_else(LogFormat::from_env);
    if let Err(e) = init_logging(format) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nodeconf failed");
            ExitCode::FAILURE
        }
    }
}
