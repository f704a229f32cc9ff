//! Display labels for validated configs
//!
//! URI configs carry their label in the `#fragment`; vmess configs carry it
//! in the `ps` field of the encoded record.

use crate::collector::geo::GeoInfo;
use crate::collector::models::{ConfigString, Protocol};
use crate::collector::resolver::decode_vmess;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Key holding the label inside a vmess record
const VMESS_LABEL_KEY: &str = "ps";

/// What to do with a label the config already carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelPolicy {
    /// Drop the existing label and use the generated one
    #[default]
    Replace,
    /// Keep a non-empty existing label; generate one only when missing
    Preserve,
}

impl FromStr for LabelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(LabelPolicy::Replace),
            "preserve" => Ok(LabelPolicy::Preserve),
            _ => Err(format!(
                "Invalid label policy: {}. Use: replace, preserve",
                s
            )),
        }
    }
}

impl fmt::Display for LabelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelPolicy::Replace => write!(f, "replace"),
            LabelPolicy::Preserve => write!(f, "preserve"),
        }
    }
}

/// First word of the ISP name, reduced to URL-safe characters
fn isp_word(isp: &str) -> String {
    let word: String = isp
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if word.is_empty() {
        "Unknown".to_string()
    } else {
        word
    }
}

/// Label written into configs, e.g. `DE-Hetzner-139ms-VLESS`
pub fn generate_label(geo: &GeoInfo, latency_ms: u64, protocol: Protocol) -> String {
    let country = if geo.is_unknown() {
        "NA".to_string()
    } else {
        geo.country_code.to_ascii_uppercase()
    };
    format!(
        "{}-{}-{}ms-{}",
        country,
        isp_word(&geo.isp),
        latency_ms,
        protocol.scheme().to_ascii_uppercase()
    )
}

/// Human-readable name for dashboards, e.g. `[DE] 🇩🇪 Hetzner 139ms`
pub fn display_name(geo: &GeoInfo, latency_ms: u64) -> String {
    format!(
        "[{}] {} {} {}ms",
        geo.country_code,
        geo.flag(),
        isp_word(&geo.isp),
        latency_ms
    )
}

fn split_fragment(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (raw, None),
    }
}

fn encode_vmess(record: &Value) -> String {
    format!("vmess://{}", STANDARD.encode(record.to_string()))
}

/// Label currently carried by the config, if any
pub fn existing_label(config: &ConfigString) -> Option<String> {
    if config.protocol().is_opaque() {
        if let Ok(record) = decode_vmess(config) {
            return record
                .get(VMESS_LABEL_KEY)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(String::from);
        }
    }
    split_fragment(config.as_str())
        .1
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

/// The config with its label removed
///
/// Two configs that differ only by label strip to the same string.
pub fn strip_label(config: &ConfigString) -> String {
    if config.protocol().is_opaque() {
        if let Ok(mut record) = decode_vmess(config) {
            if let Some(map) = record.as_object_mut() {
                map.remove(VMESS_LABEL_KEY);
            }
            return encode_vmess(&record);
        }
    }
    split_fragment(config.as_str()).0.to_string()
}

/// The config carrying `label`, according to `policy`
pub fn rename(config: &ConfigString, label: &str, policy: LabelPolicy) -> String {
    if policy == LabelPolicy::Preserve && existing_label(config).is_some() {
        return config.as_str().to_string();
    }

    if config.protocol().is_opaque() {
        if let Ok(mut record) = decode_vmess(config) {
            if let Some(map) = record.as_object_mut() {
                map.insert(VMESS_LABEL_KEY.to_string(), Value::String(label.to_string()));
                return encode_vmess(&record);
            }
        }
    }

    let (base, _) = split_fragment(config.as_str());
    format!("{}#{}", base, label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(raw: &str) -> ConfigString {
        ConfigString::parse(raw).unwrap()
    }

    fn geo(code: &str, isp: &str) -> GeoInfo {
        GeoInfo {
            country_code: code.to_string(),
            country_name: "Somewhere".to_string(),
            isp: isp.to_string(),
        }
    }

    #[test]
    fn test_label_policy_from_str() {
        assert_eq!("replace".parse::<LabelPolicy>(), Ok(LabelPolicy::Replace));
        assert_eq!("Preserve".parse::<LabelPolicy>(), Ok(LabelPolicy::Preserve));
        assert!("keep".parse::<LabelPolicy>().is_err());
    }

    #[test]
    fn test_generate_label() {
        let label = generate_label(&geo("DE", "Hetzner Online GmbH"), 139, Protocol::Vless);
        assert_eq!(label, "DE-Hetzner-139ms-VLESS");

        let label = generate_label(&GeoInfo::unknown(), 80, Protocol::Hy2);
        assert_eq!(label, "NA-Unknown-80ms-HY2");

        let label = generate_label(&geo("US", "AT&T Services"), 5, Protocol::Ss);
        assert_eq!(label, "US-ATT-5ms-SS");
    }

    #[test]
    fn test_display_name() {
        let name = display_name(&geo("DE", "Hetzner Online"), 139);
        assert_eq!(name, "[DE] \u{1F1E9}\u{1F1EA} Hetzner 139ms");
    }

    #[test]
    fn test_rename_uri_replace() {
        let c = config("vless://id@host:443?type=ws#old%20name");
        assert_eq!(
            rename(&c, "DE-X-1ms-VLESS", LabelPolicy::Replace),
            "vless://id@host:443?type=ws#DE-X-1ms-VLESS"
        );
        let c = config("trojan://pw@host:443");
        assert_eq!(
            rename(&c, "L", LabelPolicy::Replace),
            "trojan://pw@host:443#L"
        );
    }

    #[test]
    fn test_rename_uri_preserve() {
        let c = config("vless://id@host:443#mine");
        assert_eq!(rename(&c, "L", LabelPolicy::Preserve), c.as_str());

        let c = config("vless://id@host:443#");
        assert_eq!(rename(&c, "L", LabelPolicy::Preserve), "vless://id@host:443#L");
    }

    #[test]
    fn test_rename_vmess_sets_ps() {
        let raw = format!(
            "vmess://{}",
            STANDARD.encode(r#"{"add":"1.2.3.4","port":"443","ps":"old"}"#)
        );
        let c = config(&raw);
        assert_eq!(existing_label(&c), Some("old".to_string()));

        let renamed = config(&rename(&c, "NEW", LabelPolicy::Replace));
        let record = decode_vmess(&renamed).unwrap();
        assert_eq!(record["ps"], "NEW");
        assert_eq!(record["add"], "1.2.3.4");

        assert_eq!(rename(&c, "NEW", LabelPolicy::Preserve), raw);
    }

    #[test]
    fn test_strip_label_collapses_variants() {
        let a = config("vless://x@host:443#a");
        let b = config("vless://x@host:443#b");
        assert_ne!(a, b);
        assert_eq!(strip_label(&a), strip_label(&b));

        let va = config(&format!(
            "vmess://{}",
            STANDARD.encode(r#"{"add":"h","port":"1","ps":"one"}"#)
        ));
        let vb = config(&format!(
            "vmess://{}",
            STANDARD.encode(r#"{"ps":"two","port":"1","add":"h"}"#)
        ));
        assert_eq!(strip_label(&va), strip_label(&vb));
    }
}
