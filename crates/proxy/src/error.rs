//! Error types for the statsd proxy.

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

/// Errors that can occur while routing metrics or probing backends.
///
/// Only `Config` and `Bind` are fatal, and only during startup. Every other
/// variant is contained by the packet or probe that produced it.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failed to bind the listening socket.
    #[error("failed to bind listener to {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Host name did not resolve to an address of the configured family.
    #[error("no usable address for {addr}")]
    Resolve { addr: String },

    /// Failed to open an outbound socket to a backend.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    /// Routing attempted with no live node.
    #[error("no live nodes on the ring")]
    EmptyRing,

    /// Metric line without a `:` delimiter.
    #[error("malformed metric line: {line:?}")]
    MalformedLine { line: String },

    /// Node is unknown to the registry or currently down.
    #[error("node {name} is unknown or down")]
    UnknownNode { name: String },

    /// Forwarding a line to a backend failed.
    #[error("write to {node} failed: {source}")]
    BackendWrite { node: String, source: io::Error },

    /// Health probe failed or returned an unhealthy answer.
    #[error("health probe of {node} failed: {reason}")]
    Probe { node: String, reason: String },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<corelib::Error> for ProxyError {
    fn from(err: corelib::Error) -> Self {
        match err {
            corelib::Error::EmptyRing => ProxyError::EmptyRing,
            corelib::Error::InvalidReplicas(n) => {
                ProxyError::Config(ConfigError::InvalidReplicas(n))
            }
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
