//! Server address extraction and resolution
//!
//! vmess configs carry a base64 JSON record whose `add` field is the
//! server. Every other protocol is URI shaped: `scheme://[user@]host[:port]`.
//! Legacy shadowsocks links encode the whole `method:pass@host:port` part.

use crate::collector::models::{ConfigString, Protocol};
use crate::error::ResolveError;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use url::{Host, Url};

/// Default timeout for a DNS lookup in seconds
const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;

/// Port assumed when a config does not carry one
const FALLBACK_PORT: u16 = 443;

/// Host and port for configs the URI parser rejects, e.g. port ranges
static LOOSE_HOST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\[[^\]]+\]|[^:\[\]]+)(?::(\d+))?")
        .expect("Invalid host regex")
});

/// Server named by a config, before DNS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl ServerAddress {
    fn new(host: &str, port: Option<u16>) -> Result<Self, ResolveError> {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ResolveError::MissingHost);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The host as an IP literal, if it is one
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(FALLBACK_PORT)
    }
}

/// Decode base64 in any of the alphabets and padding styles seen in the wild
pub fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, ResolveError> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();

    STANDARD_NO_PAD
        .decode(&cleaned)
        .or_else(|_| URL_SAFE_NO_PAD.decode(&cleaned))
        .map_err(|e| ResolveError::Decode(e.to_string()))
}

/// Decoded vmess record
pub fn decode_vmess(config: &ConfigString) -> Result<Value, ResolveError> {
    let payload = config.payload();
    let encoded = payload.split('#').next().unwrap_or(payload);
    let bytes = decode_base64_lenient(encoded)?;
    let text = String::from_utf8(bytes).map_err(|e| ResolveError::Decode(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ResolveError::Parse(e.to_string()))
}

fn vmess_address(config: &ConfigString) -> Result<ServerAddress, ResolveError> {
    let record = decode_vmess(config)?;
    let host = record
        .get("add")
        .and_then(Value::as_str)
        .ok_or(ResolveError::MissingHost)?;
    let port = match record.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    ServerAddress::new(host, port)
}

/// `host[:port]` part of a URI config
///
/// Userinfo may hold `/` (standard base64, passwords), so the authority is
/// whatever follows the last `@` before the query or fragment.
fn authority(raw: &str) -> Result<(&str, &str), ResolveError> {
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| ResolveError::Parse(format!("not a URI: {}", raw)))?;
    let rest = rest.split(|c| c == '?' || c == '#').next().unwrap_or(rest);
    let hostport = rest.rsplit_once('@').map_or(rest, |(_, after)| after);
    let hostport = hostport.split('/').next().unwrap_or(hostport);
    Ok((scheme, hostport))
}

fn uri_address(raw: &str) -> Result<ServerAddress, ResolveError> {
    let (scheme, hostport) = authority(raw)?;
    if hostport.trim().is_empty() {
        return Err(ResolveError::MissingHost);
    }

    if let Ok(url) = Url::parse(&format!("{}://{}", scheme, hostport)) {
        let host = match url.host() {
            Some(Host::Domain(domain)) => Some(domain.to_string()),
            Some(Host::Ipv4(ip)) => Some(ip.to_string()),
            Some(Host::Ipv6(ip)) => Some(ip.to_string()),
            None => None,
        };
        if let Some(host) = host {
            return ServerAddress::new(&host, url.port());
        }
    }

    let caps = LOOSE_HOST_REGEX
        .captures(hostport)
        .ok_or_else(|| ResolveError::Parse(format!("no host in: {}", raw)))?;
    let host = caps.get(1).map(|m| m.as_str()).ok_or(ResolveError::MissingHost)?;
    let port = caps.get(2).and_then(|m| m.as_str().parse().ok());
    ServerAddress::new(host, port)
}

/// `ss://BASE64(method:password@host:port)#tag`
fn legacy_shadowsocks_address(config: &ConfigString) -> Result<ServerAddress, ResolveError> {
    let payload = config.payload();
    let encoded = payload
        .split(|c| c == '#' || c == '?')
        .next()
        .unwrap_or(payload);
    let bytes = decode_base64_lenient(encoded)?;
    let decoded = String::from_utf8(bytes).map_err(|e| ResolveError::Decode(e.to_string()))?;

    let (_, server) = decoded
        .rsplit_once('@')
        .ok_or_else(|| ResolveError::Parse("missing '@' in shadowsocks payload".to_string()))?;
    uri_address(&format!("ss://{}", server))
}

/// Extract the server address named by a config, without touching the network
pub fn server_address(config: &ConfigString) -> Result<ServerAddress, ResolveError> {
    match config.protocol() {
        p if p.is_opaque() => vmess_address(config),
        Protocol::Ss if !config.payload().split('#').next().unwrap_or("").contains('@') => {
            legacy_shadowsocks_address(config)
        }
        _ => uri_address(config.as_str()),
    }
}

/// Resolves configs to server IPs
#[derive(Debug, Clone)]
pub struct AddressResolver {
    dns_timeout: Duration,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DNS_TIMEOUT_SECS))
    }
}

impl AddressResolver {
    pub fn new(dns_timeout: Duration) -> Self {
        Self { dns_timeout }
    }

    /// Resolve a config to the IP of its server
    ///
    /// IP literals are returned as-is; hostnames get a single DNS lookup,
    /// preferring IPv4 answers.
    pub async fn resolve(&self, config: &ConfigString) -> Result<IpAddr, ResolveError> {
        let server = server_address(config)?;
        if let Some(ip) = server.ip_literal() {
            return Ok(ip);
        }
        self.lookup(&server).await
    }

    async fn lookup(&self, server: &ServerAddress) -> Result<IpAddr, ResolveError> {
        let dns_error = |reason: String| ResolveError::Dns {
            host: server.host.clone(),
            reason,
        };

        let addrs: Vec<SocketAddr> = tokio::time::timeout(
            self.dns_timeout,
            tokio::net::lookup_host((server.host.as_str(), server.port_or_default())),
        )
        .await
        .map_err(|_| dns_error(format!("timed out after {:?}", self.dns_timeout)))?
        .map_err(|e| dns_error(e.to_string()))?
        .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| a.ip())
            .ok_or_else(|| dns_error("no addresses".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn config(raw: &str) -> ConfigString {
        ConfigString::parse(raw).unwrap()
    }

    fn vmess(json: &str) -> ConfigString {
        config(&format!("vmess://{}", STANDARD.encode(json)))
    }

    #[test]
    fn test_vmess_address() {
        let c = vmess(r#"{"v":"2","ps":"x","add":"example.com","port":"8443","id":"u"}"#);
        let server = server_address(&c).unwrap();
        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, Some(8443));
    }

    #[test]
    fn test_vmess_numeric_port_and_label_suffix() {
        let json = r#"{"add":"1.2.3.4","port":443}"#;
        let c = config(&format!("vmess://{}#renamed", STANDARD.encode(json)));
        let server = server_address(&c).unwrap();
        assert_eq!(server.ip_literal(), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(server.port, Some(443));
    }

    #[test]
    fn test_vmess_bad_payload() {
        assert!(matches!(
            server_address(&config("vmess://!!!")),
            Err(ResolveError::Decode(_))
        ));
        let not_json = config(&format!("vmess://{}", STANDARD.encode("hello")));
        assert!(matches!(server_address(&not_json), Err(ResolveError::Parse(_))));
        assert_eq!(
            server_address(&vmess(r#"{"port":1}"#)),
            Err(ResolveError::MissingHost)
        );
    }

    #[test]
    fn test_uri_address() {
        let server = server_address(&config("vless://uuid@host.example:443?type=ws#a")).unwrap();
        assert_eq!(server.host, "host.example");
        assert_eq!(server.port, Some(443));

        let server = server_address(&config("trojan://pw@5.6.7.8:2053")).unwrap();
        assert_eq!(server.ip_literal(), Some("5.6.7.8".parse().unwrap()));
    }

    #[test]
    fn test_uri_address_ipv6() {
        let server = server_address(&config("vless://id@[2001:db8::1]:443")).unwrap();
        assert_eq!(server.ip_literal(), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_uri_address_port_range_falls_back() {
        let server = server_address(&config("hy2://pw@hy.example:443,5000-6000/?sni=x")).unwrap();
        assert_eq!(server.host, "hy.example");
    }

    #[test]
    fn test_uri_address_missing_host() {
        assert!(server_address(&config("trojan://")).is_err());
    }

    #[test]
    fn test_shadowsocks_sip002() {
        let userinfo = STANDARD.encode("aes-256-gcm:secret");
        let c = config(&format!("ss://{}@9.9.9.9:8388#tag", userinfo));
        let server = server_address(&c).unwrap();
        assert_eq!(server.host, "9.9.9.9");
        assert_eq!(server.port, Some(8388));
    }

    #[test]
    fn test_shadowsocks_userinfo_with_slash() {
        let c = config("ss://YWVzLTEyOC1nY206Pz8/@9.9.9.9:8388#tag");
        let server = server_address(&c).unwrap();
        assert_eq!(server.host, "9.9.9.9");
        assert_eq!(server.port, Some(8388));
    }

    #[test]
    fn test_password_with_slash() {
        let server = server_address(&config("trojan://pa/ss@1.2.3.4:443#x")).unwrap();
        assert_eq!(server.host, "1.2.3.4");
        assert_eq!(server.port, Some(443));

        let server =
            server_address(&config("vless://a/b@host.example:8443?path=/ws@x#y")).unwrap();
        assert_eq!(server.host, "host.example");
        assert_eq!(server.port, Some(8443));
    }

    #[test]
    fn test_shadowsocks_legacy() {
        let body = STANDARD.encode("aes-256-gcm:p@ss@ss.example:8388");
        let c = config(&format!("ss://{}#tag", body));
        let server = server_address(&c).unwrap();
        assert_eq!(server.host, "ss.example");
        assert_eq!(server.port, Some(8388));
    }

    #[test]
    fn test_decode_base64_lenient() {
        assert_eq!(decode_base64_lenient("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64_lenient("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode_base64_lenient("-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal_skips_dns() {
        let resolver = AddressResolver::default();
        let ip = resolver
            .resolve(&config("vless://id@10.0.0.7:443"))
            .await
            .unwrap();
        assert_eq!(ip, "10.0.0.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let resolver = AddressResolver::default();
        let ip = resolver
            .resolve(&config("trojan://pw@localhost:443"))
            .await
            .unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_unknown_host_fails() {
        let resolver = AddressResolver::default();
        let result = resolver
            .resolve(&config("trojan://pw@does-not-exist.invalid:443"))
            .await;
        assert!(matches!(result, Err(ResolveError::Dns { .. })));
    }
}
