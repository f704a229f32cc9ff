//! End-to-end pipeline: load sources, scrape, validate, write

use crate::collector::fetcher::{ContentFetcher, FetcherConfig, HttpFetcher};
use crate::collector::geo::{GeoLookup, IpApiLocator, MmdbLocator, DEFAULT_GEO_API_URL};
use crate::collector::models::RawConfigSet;
use crate::collector::prober::{CommandProber, Prober, TcpProber, DEFAULT_PROBE_PROGRAM};
use crate::collector::scraper::{Scraper, ScraperConfig};
use crate::collector::sources::{load_sources, SourceId};
use crate::collector::validator::{ValidationReport, Validator, ValidatorConfig};
use crate::collector::writer::{OutputConfig, OutputWriter};
use crate::Result;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for geo lookups in seconds
const DEFAULT_GEO_TIMEOUT_SECS: u64 = 10;

/// How reachability is measured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeBackend {
    /// External tool invoked with the config as last argument
    Command { program: String, args: Vec<String> },
    /// In-process TCP handshake timing
    Tcp,
}

impl Default for ProbeBackend {
    fn default() -> Self {
        ProbeBackend::Command {
            program: DEFAULT_PROBE_PROGRAM.to_string(),
            args: Vec::new(),
        }
    }
}

impl ProbeBackend {
    pub fn build(&self) -> Arc<dyn Prober> {
        match self {
            ProbeBackend::Command { program, args } => {
                Arc::new(CommandProber::new(program.clone()).with_args(args.clone()))
            }
            ProbeBackend::Tcp => Arc::new(TcpProber),
        }
    }
}

/// Configuration for geo enrichment
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Lookup URL with an `{ip}` placeholder
    pub api_url: String,
    /// Timeout per lookup
    pub timeout: Duration,
    /// Offline MMDB database used instead of the HTTP service
    pub mmdb_path: Option<PathBuf>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_GEO_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_GEO_TIMEOUT_SECS),
            mmdb_path: None,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mmdb_path(mut self, path: PathBuf) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Everything a run needs, fixed before the run starts
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub fetcher: FetcherConfig,
    pub scraper: ScraperConfig,
    pub validator: ValidatorConfig,
    pub geo: GeoConfig,
    pub output: OutputConfig,
    pub probe: ProbeBackend,
}

/// Counters describing a finished run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub sources: usize,
    pub raw_configs: usize,
    pub validated: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub duplicates: usize,
}

impl RunSummary {
    fn log(&self) {
        info!(
            sources = self.sources,
            raw_configs = self.raw_configs,
            validated = self.validated,
            duplicates = self.duplicates,
            rejected = ?self.rejected,
            "Run complete"
        );
    }
}

/// The collection pipeline
pub struct Pipeline<F> {
    scraper: Scraper<F>,
    validator: Validator,
    writer: OutputWriter,
}

impl Pipeline<HttpFetcher> {
    /// Build the production pipeline from configuration
    ///
    /// The HTTP client is shared by the fetcher and the geo lookups.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let fetcher = HttpFetcher::with_config(config.fetcher.clone())
            .context("Failed to create HTTP client")?;

        let geo: Arc<dyn GeoLookup> = match &config.geo.mmdb_path {
            Some(path) => Arc::new(MmdbLocator::from_path(path).with_context(|| {
                format!("Failed to open geo database {}", path.display())
            })?),
            None => Arc::new(
                IpApiLocator::new(fetcher.client().clone())
                    .with_url_template(config.geo.api_url.clone())
                    .with_timeout(config.geo.timeout),
            ),
        };

        Ok(Self::new(
            Arc::new(fetcher),
            config.probe.build(),
            geo,
            config,
        ))
    }
}

impl<F: ContentFetcher> Pipeline<F> {
    pub fn new(
        fetcher: Arc<F>,
        prober: Arc<dyn Prober>,
        geo: Arc<dyn GeoLookup>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            scraper: Scraper::new(fetcher, config.scraper),
            validator: Validator::new(prober, geo, config.validator),
            writer: OutputWriter::new(config.output),
        }
    }

    /// Phase 1: scrape all sources and write the raw protocol files
    pub async fn scrape(&self, sources: &[SourceId]) -> Result<RawConfigSet> {
        info!("--- Starting scraping phase ---");
        let configs = self.scraper.scrape_all(sources).await;
        self.writer.write_raw(&configs)?;
        Ok(configs)
    }

    /// Phase 2: validate configs and write the validated outputs
    pub async fn validate(&self, configs: RawConfigSet) -> Result<ValidationReport> {
        info!(count = configs.len(), "--- Starting validation phase ---");
        let report = self.validator.validate_all_with_report(configs).await;
        self.writer.write_validated(&report.records)?;
        Ok(report)
    }

    /// Run every phase over the given sources
    ///
    /// Finding nothing is not an error: an empty `results.json` is still
    /// written.
    pub async fn run(&self, sources: &[SourceId]) -> Result<RunSummary> {
        let mut summary = RunSummary {
            sources: sources.len(),
            ..Default::default()
        };

        if sources.is_empty() {
            warn!("No sources to scrape");
        }

        let configs = self.scrape(sources).await?;
        summary.raw_configs = configs.len();

        if configs.is_empty() {
            warn!("No configs found to validate");
            self.writer.write_validated(&[])?;
            summary.log();
            return Ok(summary);
        }

        let report = self.validate(configs).await?;
        summary.validated = report.records.len();
        summary.duplicates = report.duplicates;
        summary.rejected = report.rejected;

        summary.log();
        Ok(summary)
    }

    /// Run every phase over the sources listed in a file
    pub async fn run_from_file<P: AsRef<Path>>(&self, path: P) -> Result<RunSummary> {
        let sources = load_sources(path)?;
        self.run(&sources).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_backend_default() {
        assert_eq!(
            ProbeBackend::default(),
            ProbeBackend::Command {
                program: "xray".to_string(),
                args: Vec::new()
            }
        );
    }

    #[test]
    fn test_geo_config_builder() {
        let config = GeoConfig::new()
            .with_api_url("http://geo.local/{ip}".to_string())
            .with_timeout(Duration::from_secs(2))
            .with_mmdb_path(PathBuf::from("GeoLite2-Country.mmdb"));
        assert_eq!(config.api_url, "http://geo.local/{ip}");
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.mmdb_path, Some(PathBuf::from("GeoLite2-Country.mmdb")));
    }

    #[test]
    fn test_from_config_default() {
        assert!(Pipeline::from_config(PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_from_config_missing_mmdb_fails() {
        let mut config = PipelineConfig::default();
        config.geo = GeoConfig::new().with_mmdb_path(PathBuf::from("/nonexistent.mmdb"));
        assert!(Pipeline::from_config(config).is_err());
    }
}
