//! Crate level errors.
//!
//! # Error Taxonomy
//!
//! - **Configuration errors** ([`DeployerError::DuplicateNodeType`],
//!   [`DeployerError::UnknownNodeTypeReference`], [`DeployerError::MissingEndpoint`],
//!   [`DeployerError::InvalidManifest`]): fatal to the current operation and
//!   always carry the offending identifier.
//! - **Parse errors** in optional inputs: most are handled where they occur
//!   (dropped with a warning or defaulted). Only values without a sensible
//!   default surface as [`DeployerError::InvalidParameterValue`].
//! - **Transient I/O** ([`DeployerError::LockContention`]): retried by the
//!   [`retry`](crate::retry) layer, then surfaced.
//! - **Platform failures** ([`DeployerError::Platform`]): never retried, since
//!   they usually leave partial host state that needs an operator.
//!
//! Rollback without a prior installation is not an error; see
//! [`RollbackOutcome`](crate::operations::RollbackOutcome).

use std::{io, path::PathBuf, result};

use thiserror::Error as ThisError;

pub type DeployerResult<T> = result::Result<T, DeployerError>;

/// Errors raised while resolving or applying a node configuration.
#[derive(Debug, ThisError)]
pub enum DeployerError {
    /// Two node type definitions share a name.
    #[error("Duplicate node type: {0}")]
    DuplicateNodeType(String),

    /// A node references a node type the manifest does not define.
    #[error("Node {node} references unknown node type {node_type}")]
    UnknownNodeTypeReference { node: String, node_type: String },

    /// A seed node has no endpoint required to derive its vote.
    #[error("Node {node} is missing the {endpoint} endpoint")]
    MissingEndpoint { node: String, endpoint: &'static str },

    /// A parameter value could not be converted and has no fallback.
    #[error("Invalid value {value:?} for {section}.{parameter}")]
    InvalidParameterValue {
        section: String,
        parameter: String,
        value: String,
    },

    /// The manifest is structurally inconsistent.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Manifest validation produced errors.
    #[error("Manifest validation failed: {}", .0.join("; "))]
    ManifestValidation(Vec<String>),

    /// Filesystem failure on a specific path.
    #[error("IO error on {}: {kind:?}", path.display())]
    Io { path: PathBuf, kind: io::ErrorKind },

    /// A persisted document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process held the file for the whole retry budget.
    #[error("Could not acquire {} exclusively", .0.display())]
    LockContention(PathBuf),

    /// A platform capability call failed.
    #[error("Platform operation {operation} failed: {message}")]
    Platform {
        operation: &'static str,
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required URI never became reachable.
    #[error("URI {0} is not reachable")]
    Unreachable(String),
}

impl DeployerError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        DeployerError::Io {
            path: path.into(),
            kind: err.kind(),
        }
    }

    /// Shorthand for a failed platform call.
    pub fn platform(operation: &'static str, message: impl Into<String>) -> Self {
        DeployerError::Platform {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when retried.
    ///
    /// Only lock contention is transient. Platform failures are deliberately
    /// excluded; see the module docs.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeployerError::LockContention(_))
    }

    /// Returns true for errors caused by the manifest contents.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DeployerError::DuplicateNodeType(_)
                | DeployerError::UnknownNodeTypeReference { .. }
                | DeployerError::MissingEndpoint { .. }
                | DeployerError::InvalidParameterValue { .. }
                | DeployerError::InvalidManifest(_)
                | DeployerError::ManifestValidation(_)
        )
    }
}

impl From<serde_json::Error> for DeployerError {
    fn from(e: serde_json::Error) -> Self {
        DeployerError::Serialization(e.to_string())
    }
}

impl From<io::Error> for DeployerError {
    fn from(e: io::Error) -> Self {
        DeployerError::Io {
            path: PathBuf::new(),
            kind: e.kind(),
        }
    }
}
