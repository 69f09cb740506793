//! Node abstractions for the consistent hash ring.
//!
//! A node is one backend aggregator. It is identified on the ring and in the
//! registry by its name, `host:port`, which is derived once from the
//! immutable address fields.

use serde::Deserialize;
use std::fmt;
use std::sync::OnceLock;

/// Backend aggregator as described by configuration.
///
/// Keep this struct small and cheap to clone; mutable state (connections,
/// liveness) lives in the proxy's registry.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Hostname or IP address of the backend.
    #[serde(alias = "Host")]
    pub host: String,
    /// Port metrics are forwarded to.
    #[serde(alias = "Port")]
    pub port: u16,
    /// Port answering health probes.
    #[serde(alias = "AdminPort")]
    pub admin_port: u16,
    #[serde(skip)]
    name: OnceLock<String>,
}

impl Node {
    /// Construct a node from its address fields.
    pub fn new(host: impl Into<String>, port: u16, admin_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            admin_port,
            name: OnceLock::new(),
        }
    }

    /// Stable identifier, `host:port`.
    ///
    /// Computed on first access and cached; the address fields are never
    /// mutated after construction so the cached value cannot go stale.
    pub fn name(&self) -> &str {
        self.name
            .get_or_init(|| format!("{}:{}", self.host, self.port))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.admin_port == other.admin_port
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (admin {})", self.name(), self.admin_port)
    }
}
