//! Logging setup for the deployer binary and for embedders.
//!
//! Every deployment runs inside a `deployment` span carrying the operation
//! name, so all events emitted while resolving settings or calling platform
//! capabilities can be correlated per invocation.
//!
//! ```rust,no_run
//! use nodeconf::telemetry::{LogFormat, init_logging};
//!
//! init_logging(LogFormat::from_env()).expect("logging already initialized");
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: log filter directives (default: `info`)

use std::str::FromStr;

use tracing::Span;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for interactive runs.
    #[default]
    Pretty,
    /// One JSON object per event, for provisioning pipelines that ship logs.
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to [`LogFormat::Pretty`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else {
            Ok(LogFormat::Pretty)
        }
    }
}

impl LogFormat {
    /// Reads the format from `LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber.
///
/// Fails if a global subscriber was already installed, which happens when an
/// embedder set up its own logging first.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = tracing_subscriber::registry().with(env_filter());

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?,
    }

    tracing::debug!(format = format.as_str(), "Logging initialized");
    Ok(())
}

/// Span wrapping a single deployment operation.
pub fn deployment_span(operation: &str) -> Span {
    tracing::info_span!("deployment", operation = %operation)
}
