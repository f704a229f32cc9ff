//! Output files for subscription consumers
//!
//! Layout:
//! - `<raw>/<protocol>.txt` raw configs, one per line
//! - `<raw>/subscription.txt` base64 subscription of every raw config
//! - `<validated>/<protocol>.txt` renamed configs, one per line
//! - `<validated>/by-country/<CC>.txt` base64 subscription per country
//! - `<validated>/subscription.txt` base64 subscription of everything
//! - `<validated>/results.json` every record, always present

use crate::collector::models::{EnrichedRecord, Protocol, RawConfigSet};
use crate::Result;
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default directory for raw scraped configs
pub const DEFAULT_RAW_DIR: &str = "v2ray_configs";

/// Default directory for validated outputs
pub const DEFAULT_VALIDATED_DIR: &str = "validated_configs";

const COUNTRY_DIR: &str = "by-country";
const SUBSCRIPTION_FILE: &str = "subscription.txt";
const RESULTS_FILE: &str = "results.json";

/// Output directories
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub raw_dir: PathBuf,
    pub validated_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from(DEFAULT_RAW_DIR),
            validated_dir: PathBuf::from(DEFAULT_VALIDATED_DIR),
        }
    }
}

impl OutputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw_dir(mut self, dir: PathBuf) -> Self {
        self.raw_dir = dir;
        self
    }

    pub fn with_validated_dir(mut self, dir: PathBuf) -> Self {
        self.validated_dir = dir;
        self
    }
}

/// Files produced by one write
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub protocol_files: Vec<PathBuf>,
    pub country_files: Vec<PathBuf>,
    pub subscription_file: Option<PathBuf>,
    pub results_file: Option<PathBuf>,
}

/// Base64 subscription blob of newline-joined configs
pub fn encode_subscription<S: AsRef<str>>(configs: &[S]) -> String {
    let joined = configs
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    STANDARD.encode(joined)
}

/// Configs contained in a subscription blob
pub fn decode_subscription(blob: &str) -> Result<Vec<String>> {
    let bytes = STANDARD
        .decode(blob.trim())
        .context("Subscription is not valid base64")?;
    let text = String::from_utf8(bytes).context("Subscription is not valid UTF-8")?;
    Ok(text.lines().map(String::from).collect())
}

/// Records grouped by protocol family, `hy2` merged into `hysteria`
pub fn group_by_protocol(records: &[EnrichedRecord]) -> BTreeMap<Protocol, Vec<&EnrichedRecord>> {
    let mut groups: BTreeMap<Protocol, Vec<&EnrichedRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.protocol.family()).or_default().push(record);
    }
    groups
}

/// Records grouped by upper-case country code; unknown countries are left out
pub fn group_by_country(records: &[EnrichedRecord]) -> BTreeMap<String, Vec<&EnrichedRecord>> {
    let mut groups: BTreeMap<String, Vec<&EnrichedRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.has_country()) {
        groups
            .entry(record.country_code.to_ascii_uppercase())
            .or_default()
            .push(record);
    }
    groups
}

/// Raw configs grouped by protocol family
pub fn group_raw_by_protocol(configs: &RawConfigSet) -> BTreeMap<Protocol, Vec<&str>> {
    let mut groups: BTreeMap<Protocol, Vec<&str>> = BTreeMap::new();
    for config in configs {
        groups
            .entry(config.protocol().family())
            .or_default()
            .push(config.as_str());
    }
    groups
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn protocol_file(dir: &Path, protocol: Protocol) -> PathBuf {
    dir.join(format!("{}.txt", protocol.family()))
}

/// Writes grouped outputs to disk
pub struct OutputWriter {
    config: OutputConfig,
}

impl OutputWriter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Drop protocol files left over from a previous run
    fn clear_protocol_files(dir: &Path) -> Result<()> {
        for protocol in Protocol::ALL {
            remove_if_exists(&protocol_file(dir, protocol))?;
        }
        Ok(())
    }

    fn clear_country_files(dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "txt") {
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }

    /// Write raw configs, one file per protocol family plus a combined subscription
    pub fn write_raw(&self, configs: &RawConfigSet) -> Result<Vec<PathBuf>> {
        let dir = &self.config.raw_dir;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Self::clear_protocol_files(dir)?;
        remove_if_exists(&dir.join(SUBSCRIPTION_FILE))?;

        if configs.is_empty() {
            warn!("No raw configs to save");
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        for (protocol, lines) in group_raw_by_protocol(configs) {
            let path = protocol_file(dir, protocol);
            write_file(&path, &lines.join("\n"))?;
            info!(protocol = %protocol, count = lines.len(), path = %path.display(), "Saved raw configs");
            written.push(path);
        }

        let all: Vec<&str> = configs.iter().map(|c| c.as_str()).collect();
        let subscription_path = dir.join(SUBSCRIPTION_FILE);
        write_file(&subscription_path, &encode_subscription(&all))?;
        info!(count = all.len(), path = %subscription_path.display(), "Saved raw subscription");
        written.push(subscription_path);

        Ok(written)
    }

    /// Write validated outputs
    ///
    /// `results.json` is written even for an empty set; group files and the
    /// combined subscription only when there is something in them.
    pub fn write_validated(&self, records: &[EnrichedRecord]) -> Result<WriteSummary> {
        let dir = &self.config.validated_dir;
        let country_dir = dir.join(COUNTRY_DIR);
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Self::clear_protocol_files(dir)?;
        Self::clear_country_files(&country_dir)?;
        remove_if_exists(&dir.join(SUBSCRIPTION_FILE))?;

        let mut summary = WriteSummary::default();

        let results_path = dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(records).context("Failed to serialize results")?;
        write_file(&results_path, &json)?;
        info!(count = records.len(), path = %results_path.display(), "Saved results");
        summary.results_file = Some(results_path);

        if records.is_empty() {
            warn!("No validated configs to save");
            return Ok(summary);
        }

        for (protocol, group) in group_by_protocol(records) {
            let lines: Vec<&str> = group.iter().map(|r| r.renamed.as_str()).collect();
            let path = protocol_file(dir, protocol);
            write_file(&path, &lines.join("\n"))?;
            info!(protocol = %protocol, count = lines.len(), path = %path.display(), "Saved protocol subscription");
            summary.protocol_files.push(path);
        }

        let all: Vec<&str> = records.iter().map(|r| r.renamed.as_str()).collect();
        let subscription_path = dir.join(SUBSCRIPTION_FILE);
        write_file(&subscription_path, &encode_subscription(&all))?;
        info!(count = all.len(), path = %subscription_path.display(), "Saved combined subscription");
        summary.subscription_file = Some(subscription_path);

        let countries = group_by_country(records);
        if !countries.is_empty() {
            fs::create_dir_all(&country_dir)
                .with_context(|| format!("Failed to create {}", country_dir.display()))?;
        }
        for (country, group) in countries {
            let lines: Vec<&str> = group.iter().map(|r| r.renamed.as_str()).collect();
            let path = country_dir.join(format!("{}.txt", country));
            write_file(&path, &encode_subscription(&lines))?;
            info!(%country, count = lines.len(), path = %path.display(), "Saved country subscription");
            summary.country_files.push(path);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::models::ConfigString;
    use chrono::Utc;

    fn record(raw: &str, latency_ms: u64, country: &str) -> EnrichedRecord {
        let config = ConfigString::parse(raw).unwrap();
        let label = format!("{}-{}ms", country, latency_ms);
        EnrichedRecord {
            renamed: format!("{}#{}", raw.split('#').next().unwrap(), label),
            protocol: config.protocol(),
            config,
            display_name: label.clone(),
            label,
            latency_ms,
            country_code: country.to_string(),
            country_name: "Somewhere".to_string(),
            isp: "ISP".to_string(),
            checked_at: Utc::now(),
        }
    }

    fn writer(dir: &Path) -> OutputWriter {
        OutputWriter::new(
            OutputConfig::new()
                .with_raw_dir(dir.join("raw"))
                .with_validated_dir(dir.join("validated")),
        )
    }

    #[test]
    fn test_subscription_round_trip() {
        let configs = vec!["vless://a@h:1#x".to_string(), "trojan://b@h:2#y".to_string()];
        let blob = encode_subscription(&configs);
        assert_eq!(decode_subscription(&blob).unwrap(), configs);
    }

    #[test]
    fn test_grouping_completeness() {
        let records = vec![
            record("vless://a@h:1", 10, "DE"),
            record("hy2://b@h:2", 20, "N/A"),
            record("hysteria://c@h:3", 30, "de"),
            record("ss://d@h:4", 40, "US"),
        ];

        let by_protocol = group_by_protocol(&records);
        let protocol_total: usize = by_protocol.values().map(Vec::len).sum();
        assert_eq!(protocol_total, records.len());
        assert_eq!(by_protocol[&Protocol::Hysteria].len(), 2);
        assert!(!by_protocol.contains_key(&Protocol::Hy2));

        let by_country = group_by_country(&records);
        assert_eq!(by_country["DE"].len(), 2);
        assert_eq!(by_country["US"].len(), 1);
        assert!(!by_country.contains_key("N/A"));
    }

    #[test]
    fn test_write_raw_merges_hysteria() {
        let dir = tempfile::tempdir().unwrap();
        let configs: RawConfigSet = ["hy2://a@h:1", "hysteria://b@h:2", "vmess://abc"]
            .iter()
            .filter_map(|r| ConfigString::parse(r))
            .collect();

        let written = writer(dir.path()).write_raw(&configs).unwrap();
        assert_eq!(written.len(), 3);

        let hysteria = fs::read_to_string(dir.path().join("raw/hysteria.txt")).unwrap();
        assert_eq!(hysteria, "hy2://a@h:1\nhysteria://b@h:2");
        assert!(!dir.path().join("raw/hy2.txt").exists());
    }

    #[test]
    fn test_write_raw_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());
        let configs: RawConfigSet = ["vless://a@h:1#x", "trojan://b@h:2", "ss://c@h:3"]
            .iter()
            .filter_map(|r| ConfigString::parse(r))
            .collect();

        w.write_raw(&configs).unwrap();
        let raw = dir.path().join("raw");
        let blob = fs::read_to_string(raw.join("subscription.txt")).unwrap();
        let expected: Vec<String> = configs.iter().map(|c| c.as_str().to_string()).collect();
        assert_eq!(decode_subscription(&blob).unwrap(), expected);

        w.write_raw(&RawConfigSet::new()).unwrap();
        assert!(!raw.join("subscription.txt").exists());
        assert!(!raw.join("vless.txt").exists());
    }

    #[test]
    fn test_write_validated_layout() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record("vless://a@h:1#old", 10, "DE"),
            record("trojan://b@h:2", 20, "N/A"),
            record("vless://c@h:3", 30, "US"),
        ];

        let summary = writer(dir.path()).write_validated(&records).unwrap();
        assert_eq!(summary.protocol_files.len(), 2);
        assert_eq!(summary.country_files.len(), 2);

        let validated = dir.path().join("validated");
        let vless = fs::read_to_string(validated.join("vless.txt")).unwrap();
        assert_eq!(vless, "vless://a@h:1#DE-10ms\nvless://c@h:3#US-30ms");

        let subscription = fs::read_to_string(validated.join("subscription.txt")).unwrap();
        assert_eq!(
            decode_subscription(&subscription).unwrap(),
            vec!["vless://a@h:1#DE-10ms", "trojan://b@h:2#N/A-20ms", "vless://c@h:3#US-30ms"]
        );

        let de = fs::read_to_string(validated.join("by-country/DE.txt")).unwrap();
        assert_eq!(decode_subscription(&de).unwrap(), vec!["vless://a@h:1#DE-10ms"]);
        assert!(validated.join("by-country/US.txt").exists());

        let json = fs::read_to_string(validated.join("results.json")).unwrap();
        let parsed: Vec<EnrichedRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(json.contains("\"latency\": 10"));
    }

    #[test]
    fn test_write_validated_empty() {
        let dir = tempfile::tempdir().unwrap();
        let summary = writer(dir.path()).write_validated(&[]).unwrap();

        let validated = dir.path().join("validated");
        assert_eq!(fs::read_to_string(validated.join("results.json")).unwrap(), "[]");
        assert!(summary.protocol_files.is_empty());
        assert!(summary.subscription_file.is_none());
        assert!(!validated.join("subscription.txt").exists());
    }

    #[test]
    fn test_write_validated_clears_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());
        w.write_validated(&[record("ss://a@h:1", 5, "FR")]).unwrap();

        let validated = dir.path().join("validated");
        assert!(validated.join("ss.txt").exists());
        assert!(validated.join("by-country/FR.txt").exists());

        w.write_validated(&[record("vmess://abc", 7, "JP")]).unwrap();
        assert!(!validated.join("ss.txt").exists());
        assert!(!validated.join("by-country/FR.txt").exists());
        assert!(validated.join("vmess.txt").exists());
        assert!(validated.join("by-country/JP.txt").exists());
    }
}
