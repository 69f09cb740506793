//! Outbound and listening UDP sockets.
//!
//! Every socket the proxy opens goes through [`BackendConnector`] so the
//! configured address family is applied consistently: the listener, the
//! per-node ingest connections, and the per-node admin probe connections.

use crate::config::{join_host_port, UdpVersion};
use crate::error::{ProxyError, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, instrument};

/// Factory for the proxy's UDP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendConnector {
    version: UdpVersion,
}

impl BackendConnector {
    pub fn new(version: UdpVersion) -> Self {
        Self { version }
    }

    /// Resolves `host:port` to the first address of the configured family.
    ///
    /// # Errors
    ///
    /// `ProxyError::Resolve` if the lookup fails or yields no address of the
    /// right family.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let addr = join_host_port(host, port);
        let mut candidates = lookup_host((host, port))
            .await
            .map_err(|_| ProxyError::Resolve { addr: addr.clone() })?;
        candidates
            .find(|candidate| self.version.accepts(&candidate.ip()))
            .ok_or(ProxyError::Resolve { addr })
    }

    /// Opens a UDP socket connected to `host:port`.
    ///
    /// Connecting a UDP socket only fixes its peer; nothing is sent. Write
    /// errors against an unreachable peer surface later, on `send`.
    #[instrument(level = "debug", skip(self))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<UdpSocket> {
        let peer = self.resolve(host, port).await?;
        let connect_err = |source| ProxyError::Connect {
            addr: peer.to_string(),
            source,
        };

        let socket = UdpSocket::bind(self.version.local_addr_for(&peer))
            .await
            .map_err(connect_err)?;
        socket.connect(peer).await.map_err(connect_err)?;
        debug!("connected {} -> {}", socket.local_addr()?, peer);
        Ok(socket)
    }

    /// Binds the proxy's listening socket on `host:port`.
    ///
    /// # Errors
    ///
    /// `ProxyError::Bind` if the address does not resolve to the configured
    /// family or the port cannot be acquired.
    #[instrument(level = "info", skip(self))]
    pub async fn bind(&self, host: &str, port: u16) -> Result<UdpSocket> {
        let addr = join_host_port(host, port);
        let local = self.resolve(host, port).await.map_err(|_| ProxyError::Bind {
            addr: addr.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no {:?} address for host", self.version),
            ),
        })?;
        UdpSocket::bind(local)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })
    }
}
