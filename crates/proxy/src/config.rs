//! Configuration for the proxy.
//!
//! Loaded once at startup from `<config-dir>/<env>.json` and immutable
//! afterwards.

use corelib::ring::DEFAULT_REPLICAS;
use corelib::Node;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Probe round-trip bound when `probeTimeout` is absent.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 100;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid JSON for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// No backend nodes configured.
    #[error("at least one node is required")]
    NoNodes,

    /// Two nodes share the same `host:port`.
    #[error("node {name} is configured more than once")]
    DuplicateNode { name: String },

    /// Health-check interval is zero.
    #[error("checkInterval must be greater than zero")]
    InvalidInterval,

    /// Probe timeout is zero or does not fit in the interval.
    #[error("probeTimeout must be greater than zero and less than checkInterval ({interval_ms}ms), got {timeout_ms}ms")]
    InvalidProbeTimeout { timeout_ms: u64, interval_ms: u64 },

    /// Zero virtual points per node.
    #[error("replicas must be greater than zero, got {0}")]
    InvalidReplicas(usize),

    /// Host is empty or of the wrong address family.
    #[error("invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
}

/// UDP address family used for every socket the proxy opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdpVersion {
    /// Either family; the peer address decides.
    #[default]
    Udp,
    /// IPv4 only.
    Udp4,
    /// IPv6 only.
    Udp6,
}

impl UdpVersion {
    /// True if `ip` may be used under this family.
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            UdpVersion::Udp => true,
            UdpVersion::Udp4 => ip.is_ipv4(),
            UdpVersion::Udp6 => ip.is_ipv6(),
        }
    }

    /// Ephemeral local address to bind before connecting to `peer`.
    pub fn local_addr_for(&self, peer: &SocketAddr) -> SocketAddr {
        let ip = match (self, peer) {
            (UdpVersion::Udp6, _) | (UdpVersion::Udp, SocketAddr::V6(_)) => {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            }
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, 0)
    }
}

/// What to do with a line that has no `:` delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedLinePolicy {
    /// Drop the line and keep processing the packet.
    #[default]
    Skip,
    /// Drop the line and the rest of its packet.
    DropPacket,
}

/// Proxy configuration loaded at startup.
///
/// # Example
///
/// ```json
/// {
///   "nodes": [
///     { "host": "127.0.0.1", "port": 8129, "adminPort": 8130 },
///     { "host": "127.0.0.1", "port": 8131, "adminPort": 8132 }
///   ],
///   "host": "0.0.0.0",
///   "port": 8125,
///   "udpVersion": "udp4",
///   "checkInterval": 1000
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Backend aggregators, in probe order.
    #[serde(alias = "Nodes")]
    pub nodes: Vec<Node>,

    /// Listen host.
    #[serde(alias = "Host")]
    pub host: String,

    /// Listen port.
    #[serde(alias = "Port")]
    pub port: u16,

    #[serde(default, alias = "UdpVersion")]
    pub udp_version: UdpVersion,

    /// Health-check period in milliseconds.
    #[serde(alias = "CheckInterval")]
    pub check_interval: u64,

    /// Probe round-trip bound in milliseconds.
    #[serde(default = "default_probe_timeout", alias = "ProbeTimeout")]
    pub probe_timeout: u64,

    /// Virtual points per node on the hash ring.
    #[serde(default = "default_replicas", alias = "Replicas")]
    pub replicas: usize,

    #[serde(default, alias = "MalformedLines")]
    pub malformed_lines: MalformedLinePolicy,
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

impl ProxyConfig {
    /// Loads and validates `<dir>/<env>.json`.
    pub fn load(dir: impl AsRef<Path>, env: &str) -> Result<Self, ConfigError> {
        let path = dir.as_ref().join(format!("{env}.json"));
        Self::from_path(&path)
    }

    /// Loads and validates the config file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates an in-memory JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No nodes are configured, or two nodes share a name
    /// - A host is empty or an IP literal of the wrong family
    /// - The interval is zero or the probe timeout does not fit inside it
    /// - The replica count is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host(&self.host, self.udp_version)?;

        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            validate_host(&node.host, self.udp_version)?;
            if !seen.insert(node.name()) {
                return Err(ConfigError::DuplicateNode {
                    name: node.name().to_string(),
                });
            }
        }

        if self.check_interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        if self.probe_timeout == 0 || self.probe_timeout >= self.check_interval {
            return Err(ConfigError::InvalidProbeTimeout {
                timeout_ms: self.probe_timeout,
                interval_ms: self.check_interval,
            });
        }

        if self.replicas == 0 {
            return Err(ConfigError::InvalidReplicas(self.replicas));
        }

        Ok(())
    }

    /// Health-check period.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval)
    }

    /// Probe round-trip bound.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }

    /// `host:port` of the listening socket, bracketed for IPv6 literals.
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Formats `host:port`, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn validate_host(host: &str, version: UdpVersion) -> Result<(), ConfigError> {
    if host.trim().is_empty() {
        return Err(ConfigError::InvalidHost {
            host: host.to_string(),
            reason: "host must not be empty".to_string(),
        });
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !version.accepts(&ip) {
            return Err(ConfigError::InvalidHost {
                host: host.to_string(),
                reason: format!("address family does not match {version:?}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_NODES: &str = r#"{
        "nodes": [
            { "host": "127.0.0.1", "port": 8129, "adminPort": 8130 },
            { "host": "127.0.0.1", "port": 8131, "adminPort": 8132 }
        ],
        "host": "127.0.0.1",
        "port": 8125,
        "udpVersion": "udp4",
        "checkInterval": 1000
    }"#;

    fn base() -> ProxyConfig {
        ProxyConfig::from_json(TWO_NODES).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let config = base();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].name(), "127.0.0.1:8131");
        assert_eq!(config.udp_version, UdpVersion::Udp4);
        assert_eq!(config.check_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_millis(100));
        assert_eq!(config.replicas, 1);
        assert_eq!(config.malformed_lines, MalformedLinePolicy::Skip);
        assert_eq!(config.listen_addr(), "127.0.0.1:8125");
    }

    #[test]
    fn test_parse_capitalized_keys() {
        let raw = r#"{
            "Nodes": [{ "Host": "10.0.0.1", "Port": 8125, "AdminPort": 8126 }],
            "Host": "0.0.0.0",
            "Port": 8125,
            "UdpVersion": "udp",
            "CheckInterval": 500
        }"#;
        let config = ProxyConfig::from_json(raw).unwrap();
        assert_eq!(config.nodes[0].name(), "10.0.0.1:8125");
        assert_eq!(config.udp_version, UdpVersion::Udp);
        assert_eq!(config.check_interval, 500);
    }

    #[test]
    fn test_parse_optional_fields() {
        let raw = r#"{
            "nodes": [{ "host": "::1", "port": 8125, "adminPort": 8126 }],
            "host": "::",
            "port": 0,
            "udpVersion": "udp6",
            "checkInterval": 1000,
            "probeTimeout": 250,
            "replicas": 16,
            "malformedLines": "drop-packet"
        }"#;
        let config = ProxyConfig::from_json(raw).unwrap();
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert_eq!(config.replicas, 16);
        assert_eq!(config.malformed_lines, MalformedLinePolicy::DropPacket);
        assert_eq!(config.listen_addr(), "[::]:0");
    }

    #[test]
    fn test_parse_error() {
        let result = ProxyConfig::from_json("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let result = ProxyConfig::from_json(r#"{"nodes": [], "host": "a"}"#);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_udp_version() {
        let raw = TWO_NODES.replace("\"udp4\"", "\"tcp\"");
        assert!(matches!(
            ProxyConfig::from_json(&raw),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_no_nodes() {
        let config = ProxyConfig {
            nodes: vec![],
            ..base()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoNodes)));
    }

    #[test]
    fn test_validate_duplicate_nodes() {
        let config = ProxyConfig {
            nodes: vec![
                Node::new("127.0.0.1", 8129, 8130),
                Node::new("127.0.0.1", 8129, 9999),
            ],
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateNode { name }) if name == "127.0.0.1:8129"
        ));
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = ProxyConfig {
            check_interval: 0,
            ..base()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn test_validate_probe_timeout() {
        let config = ProxyConfig {
            probe_timeout: 0,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbeTimeout { .. })
        ));

        let config = ProxyConfig {
            probe_timeout: 1000,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbeTimeout { .. })
        ));
    }

    #[test]
    fn test_validate_zero_replicas() {
        let config = ProxyConfig {
            replicas: 0,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidReplicas(0))
        ));
    }

    #[test]
    fn test_validate_host_family() {
        let config = ProxyConfig {
            host: "::1".to_string(),
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost { .. })
        ));

        let config = ProxyConfig {
            host: String::new(),
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost { .. })
        ));

        // Hostnames are resolved later, not validated here.
        let config = ProxyConfig {
            host: "localhost".to_string(),
            ..base()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("staging.json"), TWO_NODES).unwrap();

        let config = ProxyConfig::load(dir.path(), "staging").unwrap();
        assert_eq!(config.nodes.len(), 2);

        let missing = ProxyConfig::load(dir.path(), "production");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_local_addr_for() {
        let v4: SocketAddr = "127.0.0.1:8125".parse().unwrap();
        let v6: SocketAddr = "[::1]:8125".parse().unwrap();
        assert!(UdpVersion::Udp.local_addr_for(&v4).is_ipv4());
        assert!(UdpVersion::Udp.local_addr_for(&v6).is_ipv6());
        assert!(UdpVersion::Udp4.local_addr_for(&v4).is_ipv4());
        assert!(UdpVersion::Udp6.local_addr_for(&v6).is_ipv6());
        assert_eq!(UdpVersion::Udp4.local_addr_for(&v4).port(), 0);
    }
}
