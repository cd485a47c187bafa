//! Bounded reachability polling for package sources.
//!
//! [`is_uri_reachable`] probes a URI until it answers, a probe fails in a way
//! retrying cannot fix, or the time budget runs out. Attempts are spaced by a
//! fixed interval.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use thiserror::Error as ThisError;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{DeployerError, DeployerResult};
use crate::metrics::record_reachability_attempt;
use crate::retry::reachability_policy;

/// Why a single probe failed.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProbeError {
    /// Worth retrying (connection refused, timeout, DNS hiccup).
    #[error("transient probe failure: {0}")]
    Transient(String),

    /// Retrying cannot help (unsupported scheme, missing host).
    #[error("probe failed: {0}")]
    Fatal(String),
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Transient(_))
    }
}

/// One reachability check against a URI.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, uri: &Url) -> Result<(), ProbeError>;
}

/// Probe that opens a TCP connection to the URI's host and port.
///
/// `file` URIs are checked for existence instead.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, uri: &Url) -> Result<(), ProbeError> {
        match uri.scheme() {
            "file" => {
                let path = uri
                    .to_file_path()
                    .map_err(|_| ProbeError::Fatal(format!("invalid file uri {uri}")))?;
                return match tokio::fs::metadata(&path).await {
                    Ok(_) => Ok(()),
                    Err(e) => Err(ProbeError::Transient(e.to_string())),
                };
            }
            "http" | "https" | "tcp" => {}
            other => return Err(ProbeError::Fatal(format!("unsupported scheme {other}"))),
        }

        let host = uri
            .host_str()
            .ok_or_else(|| ProbeError::Fatal(format!("{uri} has no host")))?;
        let port = uri
            .port_or_known_default()
            .ok_or_else(|| ProbeError::Fatal(format!("{uri} has no port")))?;

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Transient(e.to_string())),
            Err(_) => Err(ProbeError::Transient(format!(
                "connect to {host}:{port} timed out"
            ))),
        }
    }
}

/// Poll `uri` until it is reachable or `timeout` elapses.
///
/// Returns `Ok(false)` when the budget is exhausted or a probe fails fatally.
/// An unparseable URI is a configuration error.
pub async fn is_uri_reachable(
    probe: &dyn ReachabilityProbe,
    uri: &str,
    timeout: Duration,
    interval: Duration,
) -> DeployerResult<bool> {
    let url = Url::parse(uri).map_err(|e| DeployerError::Config(format!("invalid uri {uri}: {e}")))?;
    let url = &url;

    let attempts = (move || async move { probe.probe(url).await })
        .retry(reachability_policy(interval))
        .sleep(tokio::time::sleep)
        .when(ProbeError::is_transient)
        .notify(|err: &ProbeError, delay| {
            record_reachability_attempt("retry");
            debug!(uri = %url, error = %err, ?delay, "URI not reachable yet");
        });

    match tokio::time::timeout(timeout, attempts).await {
        Ok(Ok(())) => {
            record_reachability_attempt("success");
            info!(uri = %url, "URI reachable");
            Ok(true)
        }
        Ok(Err(err)) => {
            record_reachability_attempt("fatal");
            warn!(uri = %url, error = %err, "URI probe failed");
            Ok(false)
        }
        Err(_) => {
            record_reachability_attempt("timeout");
            warn!(uri = %url, ?timeout, "URI not reachable within budget");
            Ok(false)
        }
    }
}
