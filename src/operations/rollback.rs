use std::path::PathBuf;

use tracing::{info, warn};

use super::{Deployer, platform_call};
use crate::error::DeployerResult;
use crate::platform::capability;
use crate::retry::lock_policy;
use crate::target_info::TargetInformation;

/// Result of a rollback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// No record, or no current installation to roll back from.
    NothingToRollBack,
    RolledBack {
        /// Code version now targeted again.
        code_version: String,
        /// Undo entry point that was launched, if the installation had one.
        launched: Option<PathBuf>,
    },
}

pub(super) fn rollback(deployer: &Deployer<'_>) -> DeployerResult<RollbackOutcome> {
    let config = &deployer.params.config;
    let path = config.target_info_path();

    let record = match TargetInformation::load(&path)? {
        Some(record) if record.has_current_installation() => record,
        _ => {
            info!(path = %path.display(), "No installation to roll back");
            return Ok(RollbackOutcome::NothingToRollBack);
        }
    };

    let swapped = record.swapped();
    swapped.write_exclusive(&path, lock_policy(config))?;

    let Some(prior) = swapped.target_installation else {
        // Current existed, so after the swap the target is always set.
        return Ok(RollbackOutcome::NothingToRollBack);
    };

    let launched = match &prior.undo_entry_point {
        Some(program) => {
            platform_call(capability::PROCESS, || {
                deployer.platform.launch(program, &prior.undo_arguments)
            })?;
            Some(program.clone())
        }
        None => {
            warn!(
                code_version = %prior.code_version,
                "Prior installation has no undo entry point"
            );
            None
        }
    };

    info!(
        code_version = %prior.code_version,
        cluster_manifest_version = %prior.cluster_manifest_version,
        "Rolled back"
    );
    Ok(RollbackOutcome::RolledBack {
        code_version: prior.code_version,
        launched,
    })
}
