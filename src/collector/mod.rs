//! Collector module for discovering and validating proxy configs
//!
//! This module provides functionality for:
//! - Loading the list of content sources
//! - Fetching source pages and extracting protocol-tagged configs
//! - Resolving, probing and geolocating each unique config
//! - Writing grouped subscription files

pub mod extractor;
pub mod fetcher;
pub mod geo;
pub mod labels;
pub mod models;
pub mod pipeline;
pub mod prober;
pub mod resolver;
pub mod scraper;
pub mod sources;
pub mod validator;
pub mod writer;

pub use extractor::ConfigExtractor;
pub use fetcher::{ContentFetcher, FetcherConfig, HttpFetcher};
pub use geo::{GeoInfo, GeoLookup, IpApiLocator, MmdbLocator};
pub use labels::LabelPolicy;
pub use models::{ConfigString, EnrichedRecord, Protocol, RawConfigSet, ValidationOutcome};
pub use pipeline::{GeoConfig, Pipeline, PipelineConfig, ProbeBackend, RunSummary};
pub use prober::{CommandProber, Prober, TcpProber};
pub use resolver::AddressResolver;
pub use scraper::{ScrapeResult, Scraper, ScraperConfig};
pub use sources::{load_sources, SourceId};
pub use validator::{ValidationReport, Validator, ValidatorConfig};
pub use writer::{OutputConfig, OutputWriter};
