//! Collector data models

use crate::collector::geo::GeoInfo;
use crate::error::ValidationFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Protocol enumeration, named by URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Ss,
    Trojan,
    Hysteria,
    Hy2,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Ss,
        Protocol::Trojan,
        Protocol::Hysteria,
        Protocol::Hy2,
    ];

    /// URI scheme of the protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Ss => "ss",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria => "hysteria",
            Protocol::Hy2 => "hy2",
        }
    }

    /// Logical family used when grouping output; `hy2` folds into `hysteria`
    pub fn family(&self) -> Protocol {
        match self {
            Protocol::Hy2 => Protocol::Hysteria,
            other => *other,
        }
    }

    /// Whether the payload is an opaque base64 record rather than a URI
    pub fn is_opaque(&self) -> bool {
        matches!(self, Protocol::Vmess)
    }

    /// Classify a config string by its scheme, ignoring case
    pub fn of(config: &str) -> Option<Protocol> {
        let (scheme, _) = config.split_once("://")?;
        scheme.parse().ok()
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.scheme().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown protocol: {}", s))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// A raw connection descriptor, kept byte-for-byte as found
///
/// Equality and ordering are by the trimmed string, which is the
/// deduplication fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigString {
    raw: String,
    protocol: Protocol,
}

impl ConfigString {
    /// Parse a single line, returning `None` if it is not a recognized config
    pub fn parse(line: &str) -> Option<Self> {
        let raw = line.trim();
        let protocol = Protocol::of(raw)?;
        Some(Self {
            raw: raw.to_string(),
            protocol,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Everything after `scheme://`
    pub fn payload(&self) -> &str {
        self.raw
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default()
    }

    /// Shortened form for log lines
    pub fn truncated(&self, max: usize) -> String {
        match self.raw.char_indices().nth(max) {
            Some((idx, _)) => format!("{}...", &self.raw[..idx]),
            None => self.raw.clone(),
        }
    }
}

impl fmt::Display for ConfigString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for ConfigString {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ConfigString::parse(&value).ok_or_else(|| format!("not a config string: {}", value))
    }
}

impl From<ConfigString> for String {
    fn from(config: ConfigString) -> Self {
        config.raw
    }
}

/// Deduplicated set of discovered configs, iterated in a stable order
pub type RawConfigSet = BTreeSet<ConfigString>;

/// A config that passed validation, with its geo data and generated label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub config: ConfigString,
    #[serde(rename = "renamed_config")]
    pub renamed: String,
    pub protocol: Protocol,
    #[serde(rename = "name")]
    pub label: String,
    pub display_name: String,
    #[serde(rename = "latency")]
    pub latency_ms: u64,
    pub country_code: String,
    pub country_name: String,
    pub isp: String,
    pub checked_at: DateTime<Utc>,
}

impl EnrichedRecord {
    pub fn geo(&self) -> GeoInfo {
        GeoInfo {
            country_code: self.country_code.clone(),
            country_name: self.country_name.clone(),
            isp: self.isp.clone(),
        }
    }

    /// Whether the record has a usable country code
    pub fn has_country(&self) -> bool {
        self.country_code != GeoInfo::UNKNOWN_COUNTRY_CODE
    }
}

/// Result of validating one config: a record or the reason it was dropped
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Validated(EnrichedRecord),
    Rejected {
        config: ConfigString,
        reason: ValidationFailure,
    },
}

impl ValidationOutcome {
    pub fn is_validated(&self) -> bool {
        matches!(self, ValidationOutcome::Validated(_))
    }

    pub fn into_record(self) -> Option<EnrichedRecord> {
        match self {
            ValidationOutcome::Validated(record) => Some(record),
            ValidationOutcome::Rejected { .. } => None,
        }
    }
}
