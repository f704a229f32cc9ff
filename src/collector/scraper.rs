//! Scrape orchestration across all sources

use crate::collector::extractor::ConfigExtractor;
use crate::collector::fetcher::ContentFetcher;
use crate::collector::models::RawConfigSet;
use crate::collector::sources::SourceId;
use crate::error::FetchError;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default number of concurrent source fetches
const DEFAULT_CONCURRENCY: usize = 10;

/// Default upper bound on the time spent on one source
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 120;

/// Result of scraping a single source
#[derive(Debug)]
pub struct ScrapeResult {
    /// The source that was scraped
    pub source: SourceId,
    /// Configs extracted from the source
    pub configs: RawConfigSet,
    /// Error if fetching failed
    pub error: Option<FetchError>,
}

impl ScrapeResult {
    pub fn success(source: SourceId, configs: RawConfigSet) -> Self {
        Self {
            source,
            configs,
            error: None,
        }
    }

    pub fn failure(source: SourceId, error: FetchError) -> Self {
        Self {
            source,
            configs: RawConfigSet::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the scrape phase
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Number of sources fetched at once
    pub concurrency: usize,
    /// Hard limit on fetch time per source, retries included
    pub source_timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            source_timeout: Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS),
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_source_timeout(mut self, source_timeout: Duration) -> Self {
        self.source_timeout = source_timeout;
        self
    }
}

/// Fans sources out to a bounded pool and merges their configs
pub struct Scraper<F> {
    config: ScraperConfig,
    fetcher: Arc<F>,
}

impl<F: ContentFetcher> Scraper<F> {
    pub fn new(fetcher: Arc<F>, config: ScraperConfig) -> Self {
        Self { config, fetcher }
    }

    /// Fetch and extract a single source
    pub async fn scrape_source(&self, source: SourceId) -> ScrapeResult {
        info!(%source, "Scraping source");
        let fetched =
            match tokio::time::timeout(self.config.source_timeout, self.fetcher.fetch(&source))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.config.source_timeout)),
            };

        match fetched {
            Ok(content) => {
                let configs = ConfigExtractor::extract_from_page(&content);
                if !configs.is_empty() {
                    info!(%source, count = configs.len(), "Found configs");
                }
                ScrapeResult::success(source, configs)
            }
            Err(e) => {
                warn!(%source, error = %e, "Failed to fetch source");
                ScrapeResult::failure(source, e)
            }
        }
    }

    /// Scrape sources concurrently, returning a result for each
    pub async fn scrape_sources_with_results(&self, sources: &[SourceId]) -> Vec<ScrapeResult> {
        stream::iter(sources.iter().cloned())
            .map(|source| self.scrape_source(source))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    /// Scrape all sources into one deduplicated set
    ///
    /// Failed sources contribute nothing. The set is the same for any
    /// completion order.
    pub async fn scrape_all(&self, sources: &[SourceId]) -> RawConfigSet {
        let results = self.scrape_sources_with_results(sources).await;
        let failed = results.iter().filter(|r| !r.is_success()).count();

        let configs: RawConfigSet = results.into_iter().flat_map(|r| r.configs).collect();

        info!(
            sources = sources.len(),
            failed,
            unique_configs = configs.len(),
            "Scraping complete"
        );
        configs
    }
}
