//! Geolocation of server IPs
//!
//! Two backends: the ip-api.com HTTP service (country and ISP) and an
//! offline MaxMind MMDB database (country only). Lookups never fail; any
//! problem degrades to [`GeoInfo::unknown`].

use crate::Result;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default lookup URL, `{ip}` is substituted
pub const DEFAULT_GEO_API_URL: &str =
    "http://ip-api.com/json/{ip}?fields=status,country,countryCode,isp";

/// Default timeout for geo lookups in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Country and network owner of an IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// ISO 3166-1 alpha-2 country code, or `N/A`
    pub country_code: String,
    pub country_name: String,
    pub isp: String,
}

impl GeoInfo {
    pub const UNKNOWN_COUNTRY_CODE: &'static str = "N/A";

    pub fn unknown() -> Self {
        Self {
            country_code: Self::UNKNOWN_COUNTRY_CODE.to_string(),
            country_name: "Unknown".to_string(),
            isp: "Unknown ISP".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.country_code == Self::UNKNOWN_COUNTRY_CODE
    }

    /// Regional indicator flag for the country code
    pub fn flag(&self) -> String {
        country_flag(&self.country_code)
    }
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Emoji flag for a two-letter country code, `❓` when there is none
pub fn country_flag(country_code: &str) -> String {
    let code = country_code.to_ascii_uppercase();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return "\u{2753}".to_string();
    }
    code.bytes()
        .filter_map(|b| char::from_u32(0x1F1E6 + u32::from(b - b'A')))
        .collect()
}

/// Looks up geographic data for an IP
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> GeoInfo;
}

/// Response body of the ip-api.com JSON endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    country_code: Option<String>,
    country: Option<String>,
    isp: Option<String>,
}

impl IpApiResponse {
    fn into_geo(self) -> GeoInfo {
        if self.status != "success" {
            return GeoInfo::unknown();
        }
        let fallback = GeoInfo::unknown();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        GeoInfo {
            country_code: non_empty(self.country_code)
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(fallback.country_code),
            country_name: non_empty(self.country).unwrap_or(fallback.country_name),
            isp: non_empty(self.isp).unwrap_or(fallback.isp),
        }
    }
}

/// Parse an ip-api.com response body
pub fn parse_ip_api_response(body: &str) -> GeoInfo {
    serde_json::from_str::<IpApiResponse>(body)
        .map(IpApiResponse::into_geo)
        .unwrap_or_else(|_| GeoInfo::unknown())
}

/// Geo lookups against an ip-api.com compatible HTTP service
#[derive(Clone)]
pub struct IpApiLocator {
    client: Client,
    url_template: String,
    timeout: Duration,
}

impl IpApiLocator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            url_template: DEFAULT_GEO_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_url_template(mut self, url_template: String) -> Self {
        self.url_template = url_template;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, ip: IpAddr) -> std::result::Result<GeoInfo, reqwest::Error> {
        let url = self.url_template.replace("{ip}", &ip.to_string());
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(parse_ip_api_response(&body))
    }
}

#[async_trait]
impl GeoLookup for IpApiLocator {
    async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        match self.fetch(ip).await {
            Ok(geo) => geo,
            Err(e) => {
                debug!(%ip, error = %e, "Geo lookup failed");
                GeoInfo::unknown()
            }
        }
    }
}

/// Geo lookups in a local MMDB file
pub struct MmdbLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbLocator {
    /// Open an MMDB file, e.g. GeoLite2-Country or GeoLite2-City
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the country of an IP
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoInfo> {
        let lookup_result = self.reader.lookup(ip)?;
        let country: Option<geoip2::Country> = lookup_result.decode()?;

        let Some(country) = country else {
            return Ok(GeoInfo::unknown());
        };

        let fallback = GeoInfo::unknown();
        Ok(GeoInfo {
            country_code: country
                .country
                .iso_code
                .map(String::from)
                .unwrap_or(fallback.country_code),
            country_name: country
                .country
                .names
                .english
                .map(String::from)
                .unwrap_or(fallback.country_name),
            isp: fallback.isp,
        })
    }
}

impl Clone for MmdbLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[async_trait]
impl GeoLookup for MmdbLocator {
    async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        self.lookup_ip(ip).unwrap_or_else(|e| {
            debug!(%ip, error = %e, "MMDB lookup failed");
            GeoInfo::unknown()
        })
    }
}
