//! Config Collector - Proxy Config Discovery and Validation
//!
//! Scrapes public channels for proxy connection strings (vmess, vless, ss,
//! trojan, hysteria), checks which ones are reachable, tags them with their
//! location and writes subscription files grouped by protocol and country.

pub mod collector;
pub mod error;
pub mod logging;

pub use collector::*;
pub use error::{FetchError, ProbeError, ResolveError, ValidationFailure};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
