//! Proxy wiring: startup, the read loop and the health monitor.

use crate::config::ProxyConfig;
use crate::connector::BackendConnector;
use crate::dispatcher::PacketDispatcher;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::registry::NodeRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

/// A bound proxy ready to serve.
///
/// # Example
///
/// ```no_run
/// use proxy::{Proxy, ProxyConfig};
/// use tokio::sync::broadcast;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ProxyConfig::load(".", "config")?;
///     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
///     let proxy = Proxy::bind(config).await?;
///     tokio::spawn(async move {
///         let _ = tokio::signal::ctrl_c().await;
///         let _ = shutdown_tx.send(());
///     });
///     proxy.run(shutdown_rx).await?;
///     Ok(())
/// }
/// ```
pub struct Proxy {
    config: ProxyConfig,
    registry: Arc<NodeRegistry>,
    socket: UdpSocket,
    addr: SocketAddr,
}

impl Proxy {
    /// Binds the listening socket and brings every configured node up.
    ///
    /// A node whose ingest connection cannot be opened starts down; the
    /// health monitor retries it on every tick.
    ///
    /// # Errors
    ///
    /// `ProxyError::Bind` if the listening socket cannot be acquired.
    #[instrument(level = "info", skip_all, fields(listen = %config.listen_addr()))]
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        let connector = BackendConnector::new(config.udp_version);
        let socket = connector.bind(&config.host, config.port).await?;
        let addr = socket.local_addr()?;
        info!("bound to {} ({:?})", addr, config.udp_version);

        let registry = Arc::new(NodeRegistry::new(
            config.nodes.clone(),
            config.replicas,
            connector,
        )?);
        let bound = config.probe_timeout();
        for node in registry.nodes() {
            match timeout(bound, registry.mark_up(node.name())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(node = node.name(), "node starts down: {}", e),
                Err(_) => warn!(node = node.name(), "node starts down: connect exceeded {:?}", bound),
            }
        }
        info!(
            "{} of {} nodes live",
            registry.live_members().len(),
            registry.nodes().len()
        );

        Ok(Self {
            config,
            registry,
            socket,
            addr,
        })
    }

    /// Returns the local address the proxy is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared handle to the node registry.
    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serves packets and runs health checks until a shutdown signal is
    /// received.
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let monitor = HealthMonitor::new(
            Arc::clone(&self.registry),
            self.config.check_interval(),
            self.config.probe_timeout(),
        )
        .spawn(shutdown_rx.resubscribe());

        let dispatcher = Arc::new(PacketDispatcher::new(
            Arc::clone(&self.registry),
            self.config.malformed_lines,
        ));
        let result = dispatcher.serve(self.socket, shutdown_rx).await;
        if result.is_err() {
            monitor.abort();
        }

        match monitor.await {
            Ok(()) => info!("health monitor stopped"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("health monitor task join error: {}", e),
        }

        info!("proxy stopped");
        result
    }
}
