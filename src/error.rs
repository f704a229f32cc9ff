//! Failure taxonomy for the collection pipeline
//!
//! Every unit of work (one source, one config) fails with one of these typed
//! errors. None of them is fatal to a run: the orchestrators log them and
//! move on. Run-level failures use `anyhow` instead.

use std::time::Duration;
use thiserror::Error;

/// Failure fetching the content of a single source
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("empty content")]
    Empty,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure extracting or resolving the server address of a config
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("payload parse failed: {0}")]
    Parse(String),

    #[error("no host in config")]
    MissingHost,

    #[error("DNS lookup for {host} failed: {reason}")]
    Dns { host: String, reason: String },
}

/// Failure probing a config for reachability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe tool could not be started: {0}")]
    Spawn(String),

    #[error("probe tool exited with status {0}")]
    ExitStatus(i32),

    #[error("probe reported failure")]
    Unreachable,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("latency {latency_ms}ms exceeds limit of {limit_ms}ms")]
    TooSlow { latency_ms: u64, limit_ms: u64 },
}

/// Why a config did not make it into the validated set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("unresolvable address: {0}")]
    Unresolvable(#[from] ResolveError),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
}

impl ValidationFailure {
    /// Short stable name used for summary counters
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationFailure::Unresolvable(_) => "unresolvable",
            ValidationFailure::Probe(ProbeError::Timeout(_)) => "probe_timeout",
            ValidationFailure::Probe(ProbeError::TooSlow { .. }) => "too_slow",
            ValidationFailure::Probe(_) => "probe_failed",
        }
    }
}
