//! Reachability probing
//!
//! A probe is a best-effort health check: it measures how long it takes to
//! reach the endpoint, it does not carry traffic through it.

use crate::collector::models::ConfigString;
use crate::collector::resolver::server_address;
use crate::error::ProbeError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

/// Default probe executable, looked up on PATH
pub const DEFAULT_PROBE_PROGRAM: &str = "xray";

/// Output token that marks a failed probe
const FAILURE_TOKEN: &str = "failed";

/// Latency reported by the probe tool, e.g. `delay: 153ms`
static LATENCY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*ms\b").expect("Invalid latency regex"));

/// Measures latency to the endpoint of a config
#[async_trait]
pub trait Prober: Send + Sync {
    /// Latency in milliseconds, or why the endpoint is considered unreachable
    async fn probe(&self, config: &ConfigString, timeout: Duration) -> Result<u64, ProbeError>;
}

/// Probes by running an external tool with the config as its last argument
///
/// A non-zero exit or the failure token in stdout means unreachable. A
/// latency printed by the tool wins over the measured run time.
#[derive(Debug, Clone)]
pub struct CommandProber {
    program: String,
    args: Vec<String>,
}

impl Default for CommandProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_PROGRAM)
    }
}

impl CommandProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Interpret probe tool stdout; `None` when it reports failure
pub fn parse_probe_output(stdout: &str, elapsed_ms: u64) -> Option<u64> {
    if stdout.to_lowercase().contains(FAILURE_TOKEN) {
        return None;
    }
    let reported = LATENCY_REGEX
        .captures_iter(stdout)
        .last()
        .and_then(|cap| cap[1].parse().ok());
    Some(reported.unwrap_or(elapsed_ms))
}

#[async_trait]
impl Prober for CommandProber {
    async fn probe(&self, config: &ConfigString, timeout: Duration) -> Result<u64, ProbeError> {
        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(config.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Spawn(format!("{}: {}", self.program, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| ProbeError::Spawn(e.to_string()))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus(output.status.code().unwrap_or(-1)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&stdout, elapsed_ms).ok_or(ProbeError::Unreachable)
    }
}

/// Probes in-process by timing a TCP handshake with the server
#[derive(Debug, Clone, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, config: &ConfigString, timeout: Duration) -> Result<u64, ProbeError> {
        let server = server_address(config).map_err(|e| ProbeError::Connect(e.to_string()))?;
        let port = server.port_or_default();

        let start = Instant::now();
        let connect = async {
            match server.ip_literal() {
                Some(ip) => TcpStream::connect((ip, port)).await,
                None => TcpStream::connect((server.host.as_str(), port)).await,
            }
        };
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        let latency = start.elapsed().as_millis() as u64;

        debug!(host = %server.host, port, latency, "TCP handshake complete");
        drop(stream);
        Ok(latency)
    }
}
