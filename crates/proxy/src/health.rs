//! Periodic liveness probing of backend admin endpoints.
//!
//! Every tick probes every configured node, live or not, one after another.
//! A node answering with a payload that contains `up` is marked up; any
//! other answer, a timeout, or a socket error marks it down. Each probe is
//! bounded as a whole, address lookup and connect included, so one
//! unreachable node delays the rest of the tick by at most the probe timeout.

use crate::connector::BackendConnector;
use crate::error::{ProxyError, Result};
use crate::registry::NodeRegistry;
use corelib::Node;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Payload sent to a node's admin port.
pub const HEALTH_PROBE: &[u8] = b"health\r\n";

/// Substring a healthy node's reply contains.
pub const HEALTHY_MARKER: &[u8] = b"up";

const PROBE_BUFFER: usize = 1024;

/// Result of probing one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Up,
    Down(String),
}

/// True if an admin reply reports the node healthy.
pub fn is_healthy(response: &[u8]) -> bool {
    response
        .windows(HEALTHY_MARKER.len())
        .any(|window| window == HEALTHY_MARKER)
}

/// Health-check loop state.
///
/// Owns one connected admin socket per node, reused across ticks and
/// discarded after any probe error so a late reply to a timed-out probe is
/// never read as the answer to the next one.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    connector: BackendConnector,
    interval: Duration,
    probe_timeout: Duration,
    admin: HashMap<String, UdpSocket>,
    failures: HashMap<String, u32>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<NodeRegistry>, interval: Duration, probe_timeout: Duration) -> Self {
        let connector = registry.connector();
        Self {
            registry,
            connector,
            interval,
            probe_timeout,
            admin: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    /// Runs the loop on its own task until shutdown.
    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    /// Probes all nodes every interval until a shutdown signal arrives.
    ///
    /// The first tick fires one full interval after start; startup already
    /// attempted to bring every node up.
    #[instrument(level = "info", skip_all, fields(interval_ms = self.interval.as_millis() as u64))]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "health monitor started: {} nodes, timeout={}ms",
            self.registry.nodes().len(),
            self.probe_timeout.as_millis()
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.check_all().await;
                    debug!("health check cycle completed in {}ms", start.elapsed().as_millis());
                }
                _ = shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping health monitor");
                    break;
                }
            }
        }
    }

    /// Probes every configured node once, in configuration order.
    pub async fn check_all(&mut self) {
        let nodes: Vec<Arc<Node>> = self.registry.nodes().to_vec();
        for node in nodes {
            self.check(&node).await;
        }
    }

    /// Probes `node` and applies the outcome to the registry.
    pub async fn check(&mut self, node: &Node) -> ProbeOutcome {
        let name = node.name();
        let bound = self.probe_timeout;
        let result = match timeout(bound, self.probe(node)).await {
            Ok(result) => result,
            Err(_) => Err(probe_error(name, format!("no response within {:?}", bound))),
        };
        let outcome = match result {
            Ok(true) => ProbeOutcome::Up,
            Ok(false) => ProbeOutcome::Down("unhealthy response".to_string()),
            Err(e) => {
                self.admin.remove(name);
                ProbeOutcome::Down(e.to_string())
            }
        };

        match &outcome {
            ProbeOutcome::Up => {
                if let Some(streak) = self.failures.remove(name) {
                    info!(node = name, "node healthy again after {} failed probes", streak);
                }
                match timeout(bound, self.registry.mark_up(name)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(node = name, "healthy node could not be added: {}", e),
                    Err(_) => warn!(
                        node = name,
                        "healthy node could not be added: connect exceeded {:?}", bound
                    ),
                }
            }
            ProbeOutcome::Down(reason) => {
                let streak = self.failures.entry(name.to_string()).or_insert(0);
                *streak += 1;
                if *streak == 1 {
                    warn!(node = name, "health probe failed: {}", reason);
                } else {
                    debug!(node = name, failures = *streak, "health probe failed: {}", reason);
                }
                self.registry.mark_down(name);
            }
        }

        outcome
    }

    /// Consecutive failed probes of `name` since its last healthy answer.
    pub fn failure_streak(&self, name: &str) -> u32 {
        self.failures.get(name).copied().unwrap_or(0)
    }

    async fn probe(&mut self, node: &Node) -> Result<bool> {
        let name = node.name();
        if !self.admin.contains_key(name) {
            let socket = self.connector.connect(&node.host, node.admin_port).await?;
            self.admin.insert(name.to_string(), socket);
        }
        let socket = self.admin.get(name).ok_or_else(|| probe_error(name, "no admin socket"))?;

        socket
            .send(HEALTH_PROBE)
            .await
            .map_err(|e| probe_error(name, e))?;

        let mut buf = [0u8; PROBE_BUFFER];
        let n = socket.recv(&mut buf).await.map_err(|e| probe_error(name, e))?;

        Ok(is_healthy(&buf[..n]))
    }
}

fn probe_error(node: &str, reason: impl ToString) -> ProxyError {
    ProxyError::Probe {
        node: node.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UdpVersion;
    use parking_lot::Mutex;

    /// Admin endpoint stub: answers each probe with the current reply, or
    /// stays silent when the reply is `None`.
    async fn admin_stub(reply: Arc<Mutex<Option<Vec<u8>>>>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                assert_eq!(&buf[..n], HEALTH_PROBE);
                let answer = reply.lock().clone();
                if let Some(answer) = answer {
                    let _ = socket.send_to(&answer, peer).await;
                }
            }
        });
        port
    }

    struct Fixture {
        _ingest: UdpSocket,
        node: Node,
        reply: Arc<Mutex<Option<Vec<u8>>>>,
        registry: Arc<NodeRegistry>,
        monitor: HealthMonitor,
    }

    async fn fixture(reply: Option<&str>) -> Fixture {
        let ingest = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reply = Arc::new(Mutex::new(reply.map(|r| r.as_bytes().to_vec())));
        let admin_port = admin_stub(Arc::clone(&reply)).await;
        let node = Node::new("127.0.0.1", ingest.local_addr().unwrap().port(), admin_port);

        let registry = Arc::new(
            NodeRegistry::new(vec![node.clone()], 1, BackendConnector::new(UdpVersion::Udp4))
                .unwrap(),
        );
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Duration::from_millis(200),
            Duration::from_millis(50),
        );
        Fixture {
            _ingest: ingest,
            node,
            reply,
            registry,
            monitor,
        }
    }

    #[test]
    fn test_is_healthy() {
        assert!(is_healthy(b"up"));
        assert!(is_healthy(b"status: up\r\n"));
        assert!(!is_healthy(b"down"));
        assert!(!is_healthy(b"u"));
        assert!(!is_healthy(b""));
    }

    #[tokio::test]
    async fn test_healthy_reply_marks_up() {
        let mut fx = fixture(Some("up\r\n")).await;
        assert!(!fx.registry.is_up(fx.node.name()));

        assert_eq!(fx.monitor.check(&fx.node).await, ProbeOutcome::Up);
        assert!(fx.registry.is_up(fx.node.name()));

        // Already up: probing again changes nothing.
        assert_eq!(fx.monitor.check(&fx.node).await, ProbeOutcome::Up);
        assert_eq!(fx.registry.live_members(), vec![fx.node.name().to_string()]);
    }

    #[tokio::test]
    async fn test_unhealthy_reply_marks_down() {
        let mut fx = fixture(Some("down\r\n")).await;
        fx.registry.mark_up(fx.node.name()).await.unwrap();

        let outcome = fx.monitor.check(&fx.node).await;
        assert!(matches!(outcome, ProbeOutcome::Down(_)));
        assert!(!fx.registry.is_up(fx.node.name()));
    }

    #[tokio::test]
    async fn test_silence_marks_down() {
        let mut fx = fixture(None).await;
        fx.registry.mark_up(fx.node.name()).await.unwrap();

        let outcome = fx.monitor.check(&fx.node).await;
        assert!(matches!(outcome, ProbeOutcome::Down(reason) if reason.contains("no response")));
        assert!(!fx.registry.is_up(fx.node.name()));
    }

    #[tokio::test]
    async fn test_down_then_recovers() {
        let mut fx = fixture(None).await;
        fx.registry.mark_up(fx.node.name()).await.unwrap();

        for expected in 1..=3 {
            assert!(matches!(fx.monitor.check(&fx.node).await, ProbeOutcome::Down(_)));
            assert!(!fx.registry.is_up(fx.node.name()));
            assert_eq!(fx.monitor.failure_streak(fx.node.name()), expected);
        }
        assert!(matches!(fx.registry.route(b"any.key"), Err(ProxyError::EmptyRing)));

        *fx.reply.lock() = Some(b"up".to_vec());
        assert_eq!(fx.monitor.check(&fx.node).await, ProbeOutcome::Up);
        assert!(fx.registry.is_up(fx.node.name()));
        assert_eq!(fx.monitor.failure_streak(fx.node.name()), 0);
        assert_eq!(fx.registry.route(b"any.key").unwrap().node, fx.node.name());
    }

    #[tokio::test]
    async fn test_closed_admin_port_marks_down() {
        let ingest = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let node = Node::new("127.0.0.1", ingest.local_addr().unwrap().port(), 1);
        let registry = Arc::new(
            NodeRegistry::new(vec![node.clone()], 1, BackendConnector::new(UdpVersion::Udp4))
                .unwrap(),
        );
        registry.mark_up(node.name()).await.unwrap();

        // The admin port is closed; the probe either errors or times out.
        let mut monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Duration::from_millis(200),
            Duration::from_millis(50),
        );
        assert!(matches!(monitor.check(&node).await, ProbeOutcome::Down(_)));
        assert!(!registry.is_up(node.name()));
    }

    #[tokio::test]
    async fn test_unresolvable_admin_host_is_bounded() {
        let node = Node::new("statsd-backend.invalid", 8129, 8130);
        let registry = Arc::new(
            NodeRegistry::new(vec![node.clone()], 1, BackendConnector::new(UdpVersion::Udp4))
                .unwrap(),
        );
        let mut monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Duration::from_millis(200),
            Duration::from_millis(100),
        );

        // Lookup either fails fast or is cut off with the rest of the probe.
        let start = Instant::now();
        let outcome = monitor.check(&node).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(outcome, ProbeOutcome::Down(_)));
        assert_eq!(monitor.failure_streak(node.name()), 1);
        assert!(!registry.is_up(node.name()));
    }

    #[tokio::test]
    async fn test_run_ticks_and_stops() {
        let fx = fixture(Some("up")).await;
        let registry = Arc::clone(&fx.registry);
        let name = fx.node.name().to_string();
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(10),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = monitor.spawn(shutdown_rx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !registry.is_up(&name) {
            assert!(Instant::now() < deadline, "monitor never marked node up");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
