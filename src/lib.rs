//! # nodeconf
//! Resolves a cluster manifest into per-node configuration and applies it to
//! the local host.
//!
//! A deployment starts from a **cluster manifest** (node types, infrastructure
//! description, settings sections) and an optional **infrastructure inventory**.
//! From these the crate resolves:
//!
//! - the [`Infrastructure`](infrastructure::Infrastructure): concrete nodes,
//!   seed votes and seed client connection addresses;
//! - the [`ClusterSettings`](settings::ClusterSettings): defaults, manifest
//!   overrides, management parameters and votes, split into host and node
//!   settings;
//! - per-node [`NodeSettings`](settings::NodeSettings),
//!   [`Versions`](versions::Versions), unreliable transport rules and
//!   dynamic port range reductions.
//!
//! The [`operations`] module then writes the resulting files under the data
//! root and drives the host through the [`platform`] capability traits.
//!
//! ## Running an operation
//!
//! ```rust,no_run
//! use nodeconf::prelude::*;
//! use std::path::PathBuf;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeployerConfig::from_env()?;
//!     let mut params = DeploymentParameters::new(DeploymentOperation::Create, config);
//!     params.cluster_manifest = Some(PathBuf::from("ClusterManifest.json"));
//!
//!     let platform = LinuxPlatform::new(&params.config);
//!     let identity = LocalMachineIdentity::resolve();
//!     let probe = TcpProbe::default();
//!
//!     let outcome = Deployer::new(&params, &platform, &identity, &probe).run().await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod endpoints;
pub mod error;
pub mod infrastructure;
pub mod manifest;
pub mod metrics;
pub mod operations;
pub mod platform;
pub mod ports;
pub mod reachability;
pub mod retry;
pub mod settings;
pub mod target_info;
pub mod telemetry;
pub mod unreliable_transport;
pub mod validation;
pub mod versions;

pub use config::DeployerConfig;
pub use error::{DeployerError, DeployerResult};
pub use operations::{Deployer, DeploymentOperation, DeploymentParameters, OperationOutcome};

pub mod prelude {
    //! Types needed to run a deployment operation.
    pub use crate::config::DeployerConfig;
    pub use crate::error::{DeployerError, DeployerResult};
    pub use crate::infrastructure::LocalMachineIdentity;
    pub use crate::manifest::{ClusterManifest, InfrastructureInformation};
    pub use crate::operations::{
        Deployer, DeploymentOperation, DeploymentParameters, OperationOutcome, RollbackOutcome,
    };
    pub use crate::platform::Platform;
    pub use crate::platform::linux::LinuxPlatform;
    pub use crate::reachability::{ReachabilityProbe, TcpProbe};
    pub use crate::telemetry::{LogFormat, init_logging};
}
