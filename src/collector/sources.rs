//! Source list loading

use anyhow::Context;
use crate::Result;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Identifier of a content source, usually a public channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is already a full URL
    pub fn is_url(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// URL to fetch, substituting `{source}` in the template unless the
    /// identifier is a URL itself
    pub fn url(&self, template: &str) -> String {
        if self.is_url() {
            self.0.clone()
        } else {
            template.replace("{source}", &self.0)
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a source list, skipping blank lines and `#` comments
pub fn parse_sources(content: &str) -> Vec<SourceId> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(SourceId::new)
        .collect()
}

/// Load the source list from a file
///
/// A missing or unreadable file is fatal for the run.
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<Vec<SourceId>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read source list {}", path.display()))?;
    let sources = parse_sources(&content);

    if sources.is_empty() {
        warn!(path = %path.display(), "Source list is empty");
    } else {
        info!(path = %path.display(), count = sources.len(), "Loaded sources");
    }

    Ok(sources)
}
