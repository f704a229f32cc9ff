//! HTTP fetcher for source pages

use crate::collector::sources::SourceId;
use crate::error::FetchError;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay between retries, doubled on every attempt
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Public web preview of a channel
const DEFAULT_URL_TEMPLATE: &str = "https://t.me/s/{source}";

/// Statuses worth retrying; other errors are permanent
const RETRY_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Source of raw page content
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceId) -> std::result::Result<String, FetchError>;
}

/// Configuration for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for each HTTP request
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// URL template with a `{source}` placeholder
    pub url_template: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_url_template(mut self, url_template: String) -> Self {
        self.url_template = url_template;
        self
    }

    /// Delay before the given retry attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Worst-case time a single fetch can take, including retries
    pub fn deadline(&self) -> Duration {
        let waits: Duration = (1..=self.max_retries).map(|a| self.backoff(a)).sum();
        self.timeout * (self.max_retries + 1) + waits
    }
}

/// Fetches source pages over a shared, pooled HTTP client
#[derive(Clone)]
pub struct HttpFetcher {
    config: FetcherConfig,
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Underlying client, shared with other HTTP users of the run
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }

    /// Fetch a URL, retrying transient failures with exponential backoff
    pub async fn fetch_url(&self, url: &str) -> std::result::Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    debug!(url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying fetch");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceId) -> std::result::Result<String, FetchError> {
        let url = source.url(&self.config.url_template);
        self.fetch_url(&url).await
    }
}

/// Whether a failed attempt should be retried
pub fn is_retryable(error: &FetchError) -> bool {
    match error {
        FetchError::Status(code) => RETRY_STATUSES.contains(code),
        FetchError::Request(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status().map_or(false, |s| s == StatusCode::TOO_MANY_REQUESTS)
        }
        FetchError::Empty | FetchError::Timeout(_) => false,
    }
}
