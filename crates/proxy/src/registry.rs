//! Node registry: the single source of truth for which backends receive
//! traffic.
//!
//! The registry owns the hash ring and every outbound ingest connection.
//! Both live behind one lock so ring membership and connection presence
//! always change together: a name is on the ring if and only if its node
//! holds a live connection.

use crate::connector::BackendConnector;
use crate::error::{ProxyError, Result};
use corelib::{HashRing, Node};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, warn};

struct Entry {
    node: Arc<Node>,
    connection: Option<Arc<UdpSocket>>,
}

struct State {
    ring: HashRing,
    entries: HashMap<String, Entry>,
}

/// Destination of one metric line.
#[derive(Debug, Clone)]
pub struct Route {
    /// Name of the node the key resolved to.
    pub node: String,
    /// Its ingest connection, valid for a single write.
    pub connection: Arc<UdpSocket>,
}

/// Registry of every configured node, live or not.
pub struct NodeRegistry {
    state: Mutex<State>,
    nodes: Vec<Arc<Node>>,
    connector: BackendConnector,
}

impl NodeRegistry {
    /// Registers `nodes` with an empty ring; nothing is routable until
    /// [`mark_up`](Self::mark_up) succeeds for a node.
    ///
    /// # Errors
    ///
    /// Returns an error if `replicas` is zero.
    pub fn new(nodes: Vec<Node>, replicas: usize, connector: BackendConnector) -> Result<Self> {
        let ring = HashRing::with_replicas(replicas)?;
        let nodes: Vec<Arc<Node>> = nodes.into_iter().map(Arc::new).collect();
        let entries = nodes
            .iter()
            .map(|node| {
                (
                    node.name().to_string(),
                    Entry {
                        node: Arc::clone(node),
                        connection: None,
                    },
                )
            })
            .collect();

        Ok(Self {
            state: Mutex::new(State { ring, entries }),
            nodes,
            connector,
        })
    }

    /// Configured nodes in configuration order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn connector(&self) -> BackendConnector {
        self.connector
    }

    /// Makes `name` routable.
    ///
    /// Opens the ingest connection outside the lock, then stores it and adds
    /// the node to the ring. Returns `Ok(false)` if the node was already up.
    ///
    /// # Errors
    ///
    /// `UnknownNode` for a name that was never configured; the connector's
    /// error if the connection cannot be opened, in which case the node stays
    /// off the ring.
    pub async fn mark_up(&self, name: &str) -> Result<bool> {
        let node = {
            let state = self.state.lock();
            let entry = state.entries.get(name).ok_or_else(|| unknown(name))?;
            if entry.connection.is_some() {
                return Ok(false);
            }
            Arc::clone(&entry.node)
        };

        let socket = match self.connector.connect(&node.host, node.port).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(node = name, "cannot connect to node: {}", e);
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        let State { ring, entries } = &mut *state;
        let entry = entries.get_mut(name).ok_or_else(|| unknown(name))?;
        if entry.connection.is_some() {
            // Raced with another mark_up; keep the connection already stored.
            return Ok(false);
        }
        entry.connection = Some(socket);
        ring.add(name);

        info!(node = name, live = ring.len(), "adding node");
        metrics::counter!("statsd_proxy_node_transitions_total", "direction" => "up").increment(1);
        metrics::gauge!("statsd_proxy_live_nodes").set(ring.len() as f64);
        Ok(true)
    }

    /// Takes `name` out of routing and drops its connection.
    ///
    /// Returns `false`, with no side effect, if the node is already down or
    /// unknown.
    pub fn mark_down(&self, name: &str) -> bool {
        Self::take_down(&mut self.state.lock(), name)
    }

    /// Takes `name` out of routing only if `connection` is still the one it
    /// routes through.
    ///
    /// A write failure on a connection that was already replaced by a newer
    /// `mark_up` leaves the node alone and returns `false`.
    pub fn mark_down_connection(&self, name: &str, connection: &Arc<UdpSocket>) -> bool {
        let mut state = self.state.lock();
        let current = state
            .entries
            .get(name)
            .and_then(|entry| entry.connection.as_ref())
            .is_some_and(|stored| Arc::ptr_eq(stored, connection));
        if !current {
            return false;
        }
        Self::take_down(&mut state, name)
    }

    fn take_down(state: &mut State, name: &str) -> bool {
        let State { ring, entries } = state;
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };

        let had_connection = entry.connection.take().is_some();
        let was_member = ring.remove(name);
        if !(had_connection || was_member) {
            return false;
        }

        info!(node = name, live = ring.len(), "removing node");
        metrics::counter!("statsd_proxy_node_transitions_total", "direction" => "down")
            .increment(1);
        metrics::gauge!("statsd_proxy_live_nodes").set(ring.len() as f64);
        true
    }

    /// Live ingest connection of `name`.
    ///
    /// # Errors
    ///
    /// `UnknownNode` if the node is unknown or currently down.
    pub fn connection_for(&self, name: &str) -> Result<Arc<UdpSocket>> {
        self.state
            .lock()
            .entries
            .get(name)
            .and_then(|entry| entry.connection.clone())
            .ok_or_else(|| unknown(name))
    }

    /// Resolves `key` to a node and its connection under one lock
    /// acquisition.
    ///
    /// # Errors
    ///
    /// `EmptyRing` when no node is live, `UnknownNode` if the ring names a
    /// node without a connection.
    pub fn route(&self, key: &[u8]) -> Result<Route> {
        let state = self.state.lock();
        let name = state.ring.resolve(key)?;
        let connection = state
            .entries
            .get(name)
            .and_then(|entry| entry.connection.clone())
            .ok_or_else(|| unknown(name))?;
        Ok(Route {
            node: name.to_string(),
            connection,
        })
    }

    /// Name of the node `key` currently routes to.
    pub fn resolve(&self, key: &[u8]) -> Result<String> {
        Ok(self.state.lock().ring.resolve(key)?.to_string())
    }

    /// True if `name` is on the ring.
    pub fn is_up(&self, name: &str) -> bool {
        self.state.lock().ring.contains(name)
    }

    /// Names currently on the ring, sorted.
    pub fn live_members(&self) -> Vec<String> {
        self.state
            .lock()
            .ring
            .members()
            .map(str::to_string)
            .collect()
    }
}

fn unknown(name: &str) -> ProxyError {
    ProxyError::UnknownNode {
        name: name.to_string(),
    }
}
