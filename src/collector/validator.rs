//! Validation orchestration: resolve, probe and enrich every config

use crate::collector::geo::GeoLookup;
use crate::collector::labels::{self, LabelPolicy};
use crate::collector::models::{ConfigString, EnrichedRecord, RawConfigSet, ValidationOutcome};
use crate::collector::prober::Prober;
use crate::collector::resolver::AddressResolver;
use crate::error::{ProbeError, ValidationFailure};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default number of concurrent validations
const DEFAULT_CONCURRENCY: usize = 15;

/// Default hard timeout per probe in seconds
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 15;

/// Default DNS timeout in seconds
const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;

/// Default maximum acceptable latency in milliseconds
const DEFAULT_MAX_LATENCY_MS: u64 = 3000;

/// Log progress every this many processed configs
const PROGRESS_INTERVAL: usize = 20;

/// Configuration for the validation phase
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Number of configs validated at once
    pub concurrency: usize,
    /// Hard limit on a single probe
    pub probe_timeout: Duration,
    /// Limit on a single DNS lookup
    pub dns_timeout: Duration,
    /// Slower probes are rejected
    pub max_latency_ms: u64,
    /// Treatment of labels already present on configs
    pub label_policy: LabelPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            dns_timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_SECS),
            max_latency_ms: DEFAULT_MAX_LATENCY_MS,
            label_policy: LabelPolicy::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    pub fn with_label_policy(mut self, policy: LabelPolicy) -> Self {
        self.label_policy = policy;
        self
    }
}

/// Outcome of validating a whole set
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Validated records, ascending by latency
    pub records: Vec<EnrichedRecord>,
    /// Rejections by failure kind
    pub rejected: BTreeMap<&'static str, usize>,
    /// Records dropped because another config differed only by label
    pub duplicates: usize,
}

impl ValidationReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Validates configs on a bounded pool
#[derive(Clone)]
pub struct Validator {
    config: ValidatorConfig,
    resolver: AddressResolver,
    prober: Arc<dyn Prober>,
    geo: Arc<dyn GeoLookup>,
}

impl Validator {
    pub fn new(prober: Arc<dyn Prober>, geo: Arc<dyn GeoLookup>, config: ValidatorConfig) -> Self {
        Self {
            resolver: AddressResolver::new(config.dns_timeout),
            config,
            prober,
            geo,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    async fn probe(&self, config: &ConfigString) -> Result<u64, ProbeError> {
        let timeout = self.config.probe_timeout;
        let latency_ms = tokio::time::timeout(timeout, self.prober.probe(config, timeout))
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;

        if latency_ms > self.config.max_latency_ms {
            return Err(ProbeError::TooSlow {
                latency_ms,
                limit_ms: self.config.max_latency_ms,
            });
        }
        Ok(latency_ms)
    }

    async fn try_validate(&self, config: &ConfigString) -> Result<EnrichedRecord, ValidationFailure> {
        let ip = self.resolver.resolve(config).await?;
        let latency_ms = self.probe(config).await?;
        let geo = self.geo.lookup(ip).await;

        let protocol = config.protocol();
        let label = labels::generate_label(&geo, latency_ms, protocol);
        let renamed = labels::rename(config, &label, self.config.label_policy);

        Ok(EnrichedRecord {
            config: config.clone(),
            renamed,
            protocol,
            display_name: labels::display_name(&geo, latency_ms),
            label,
            latency_ms,
            country_code: geo.country_code,
            country_name: geo.country_name,
            isp: geo.isp,
            checked_at: Utc::now(),
        })
    }

    /// Validate a single config
    pub async fn validate(&self, config: ConfigString) -> ValidationOutcome {
        match self.try_validate(&config).await {
            Ok(record) => {
                debug!(config = %config.truncated(40), latency = record.latency_ms, "Validated");
                ValidationOutcome::Validated(record)
            }
            Err(reason) => {
                info!(
                    config = %config.truncated(40),
                    kind = reason.kind(),
                    %reason,
                    "Rejected config"
                );
                ValidationOutcome::Rejected { config, reason }
            }
        }
    }

    /// Validate configs in the background, delivering outcomes as they complete
    pub fn validate_stream(&self, configs: RawConfigSet) -> mpsc::Receiver<ValidationOutcome> {
        let (tx, rx) = mpsc::channel(self.config.concurrency * 2);
        let validator = self.clone();

        tokio::spawn(async move {
            let concurrency = validator.config.concurrency;
            let mut outcomes = stream::iter(configs)
                .map(|config| validator.validate(config))
                .buffer_unordered(concurrency);

            while let Some(outcome) = outcomes.next().await {
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Validate every config, returning records and rejection counts
    ///
    /// Records are sorted by ascending latency. Configs that collapse to
    /// the same string once their label is stripped keep only the fastest.
    pub async fn validate_all_with_report(&self, configs: RawConfigSet) -> ValidationReport {
        let total = configs.len();
        let mut rx = self.validate_stream(configs);
        let mut report = ValidationReport::default();
        let mut processed = 0;

        while let Some(outcome) = rx.recv().await {
            processed += 1;
            match outcome {
                ValidationOutcome::Validated(record) => report.records.push(record),
                ValidationOutcome::Rejected { reason, .. } => {
                    *report.rejected.entry(reason.kind()).or_insert(0) += 1;
                }
            }
            if processed % PROGRESS_INTERVAL == 0 || processed == total {
                info!("Validation progress: {}/{} configs processed", processed, total);
            }
        }

        report.records.sort_by(|a, b| {
            a.latency_ms
                .cmp(&b.latency_ms)
                .then_with(|| a.config.cmp(&b.config))
        });

        let before = report.records.len();
        let mut seen = HashSet::new();
        report
            .records
            .retain(|record| seen.insert(labels::strip_label(&record.config)));
        report.duplicates = before - report.records.len();

        info!(
            validated = report.records.len(),
            rejected = report.rejected_total(),
            duplicates = report.duplicates,
            "Validation complete"
        );
        report
    }

    /// Validate every config, returning the records ascending by latency
    pub async fn validate_all(&self, configs: RawConfigSet) -> Vec<EnrichedRecord> {
        self.validate_all_with_report(configs).await.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::geo::GeoInfo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::IpAddr;

    /// Latency per host substring; unknown hosts time out
    struct FakeProber {
        latencies: HashMap<&'static str, u64>,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, config: &ConfigString, _timeout: Duration) -> Result<u64, ProbeError> {
            for (needle, latency) in &self.latencies {
                if config.as_str().contains(needle) {
                    return Ok(*latency);
                }
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        }
    }

    struct FakeGeo {
        success: bool,
    }

    #[async_trait]
    impl GeoLookup for FakeGeo {
        async fn lookup(&self, _ip: IpAddr) -> GeoInfo {
            if self.success {
                GeoInfo {
                    country_code: "DE".to_string(),
                    country_name: "Germany".to_string(),
                    isp: "Hetzner Online".to_string(),
                }
            } else {
                GeoInfo::unknown()
            }
        }
    }

    fn validator(latencies: &[(&'static str, u64)], geo_success: bool) -> Validator {
        let prober = FakeProber {
            latencies: latencies.iter().cloned().collect(),
        };
        let config = ValidatorConfig::new().with_probe_timeout(Duration::from_millis(50));
        Validator::new(Arc::new(prober), Arc::new(FakeGeo { success: geo_success }), config)
    }

    fn set(raw: &[&str]) -> RawConfigSet {
        raw.iter().filter_map(|r| ConfigString::parse(r)).collect()
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rejection_logged_at_info() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let v = validator(&[], true);
        let outcome = v.validate(ConfigString::parse("trojan://pw@").unwrap()).await;
        assert!(!outcome.is_validated());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Rejected config"));
        assert!(output.contains("unresolvable"));
        assert!(output.contains("trojan://pw@"));
    }

    #[test]
    fn test_validator_config_builder() {
        let config = ValidatorConfig::new()
            .with_concurrency(0)
            .with_probe_timeout(Duration::from_secs(3))
            .with_max_latency_ms(500)
            .with_label_policy(LabelPolicy::Preserve);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.max_latency_ms, 500);
        assert_eq!(config.label_policy, LabelPolicy::Preserve);
    }

    #[tokio::test]
    async fn test_records_sorted_by_latency() {
        let v = validator(&[("10.0.0.1", 300), ("10.0.0.2", 20), ("10.0.0.3", 150)], true);
        let records = v
            .validate_all(set(&[
                "trojan://a@10.0.0.1:443",
                "trojan://b@10.0.0.2:443",
                "vless://c@10.0.0.3:443",
            ]))
            .await;

        let latencies: Vec<u64> = records.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![20, 150, 300]);
        assert_eq!(records[0].renamed, "trojan://b@10.0.0.2:443#DE-Hetzner-20ms-TROJAN");
        assert_eq!(records[0].country_code, "DE");
    }

    #[tokio::test]
    async fn test_probe_timeout_drops_config() {
        let v = validator(&[("10.0.0.1", 100)], true);
        let report = v
            .validate_all_with_report(set(&["trojan://a@10.0.0.1:443", "trojan://b@10.0.0.9:443"]))
            .await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.rejected.get("probe_timeout"), Some(&1));
    }

    #[tokio::test]
    async fn test_geo_failure_still_validates() {
        let v = validator(&[("10.0.0.1", 100)], false);
        let records = v.validate_all(set(&["vless://a@10.0.0.1:443"])).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country_code, "N/A");
        assert!(!records[0].has_country());
    }

    #[tokio::test]
    async fn test_unresolvable_and_slow_rejected() {
        let v = validator(&[("10.0.0.1", 5000)], true);
        let report = v
            .validate_all_with_report(set(&["vmess://not-base64!", "ss://a@10.0.0.1:1"]))
            .await;

        assert!(report.records.is_empty());
        assert_eq!(report.rejected.get("unresolvable"), Some(&1));
        assert_eq!(report.rejected.get("too_slow"), Some(&1));
        assert_eq!(report.rejected_total(), 2);
    }

    #[tokio::test]
    async fn test_label_variants_collapse_to_fastest() {
        let v = validator(&[("#slow", 400), ("#fast", 40)], true);
        let report = v
            .validate_all_with_report(set(&[
                "vless://x@10.0.0.1:443#slow",
                "vless://x@10.0.0.1:443#fast",
            ]))
            .await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.records[0].config.as_str(), "vless://x@10.0.0.1:443#fast");
    }

    #[tokio::test]
    async fn test_validate_stream_delivers_every_outcome() {
        let v = validator(&[("10.0.0.1", 10)], true);
        let mut rx = v.validate_stream(set(&["trojan://a@10.0.0.1:1", "vmess://bad!"]));

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.is_validated()).count(), 1);
    }
}
