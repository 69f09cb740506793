//! UDP statsd proxy with consistent-hash routing.
//!
//! Metric lines received on one socket are routed by key to a ring of
//! backend aggregators. A health monitor probes each backend's admin port and
//! adds or removes it from the ring.

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod registry;
pub mod server;

pub use config::{ConfigError, MalformedLinePolicy, ProxyConfig, UdpVersion};
pub use connector::BackendConnector;
pub use dispatcher::{DispatchSummary, Packet, PacketDispatcher};
pub use error::{ProxyError, Result};
pub use health::{HealthMonitor, ProbeOutcome};
pub use registry::{NodeRegistry, Route};
pub use server::Proxy;
