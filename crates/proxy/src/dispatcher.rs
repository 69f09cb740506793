//! Packet parsing and per-line forwarding.
//!
//! Each received datagram becomes a [`Packet`] and is handled on its own
//! task. Lines inside one packet are forwarded in order; nothing is ordered
//! across packets.

use crate::config::MalformedLinePolicy;
use crate::error::{ProxyError, Result};
use crate::registry::NodeRegistry;
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Largest UDP payload the read loop accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// One received datagram.
///
/// Only the first `length` bytes of `buffer` are valid.
#[derive(Debug, Clone)]
pub struct Packet {
    pub length: usize,
    pub buffer: Bytes,
}

impl Packet {
    pub fn new(buffer: Bytes, length: usize) -> Self {
        Self { length, buffer }
    }

    /// The valid bytes, never past `length`.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.length.min(self.buffer.len())]
    }

    /// Metric lines in order of appearance.
    pub fn lines(&self) -> Lines<'_> {
        Lines::new(self.payload())
    }
}

impl From<Bytes> for Packet {
    fn from(buffer: Bytes) -> Self {
        let length = buffer.len();
        Self { length, buffer }
    }
}

/// Iterator over the `\n`-separated lines of a payload.
///
/// Terminators are stripped. The end of the payload terminates the last
/// line. Empty lines carry no metric and are skipped.
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Lines<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let line = match self.rest.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    let line = &self.rest[..end];
                    self.rest = &self.rest[end + 1..];
                    line
                }
                None => std::mem::take(&mut self.rest),
            };
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

/// Routing key of a metric line: everything before the first `:`.
pub fn metric_key(line: &[u8]) -> Option<&[u8]> {
    line.iter().position(|&b| b == b':').map(|end| &line[..end])
}

/// Outcome of handling one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub forwarded: usize,
    pub dropped: usize,
}

/// Parses packets and forwards each line to the node its key resolves to.
pub struct PacketDispatcher {
    registry: Arc<NodeRegistry>,
    policy: MalformedLinePolicy,
}

impl PacketDispatcher {
    pub fn new(registry: Arc<NodeRegistry>, policy: MalformedLinePolicy) -> Self {
        Self { registry, policy }
    }

    /// Forwards every line of `packet`.
    ///
    /// Failures are contained per line: a write error marks the destination
    /// down if it still routes through the failed connection, and routing or
    /// parse errors drop the line. Processing then continues with the next
    /// line, unless the policy drops the rest of a packet after a malformed
    /// line.
    pub async fn handle(&self, packet: &Packet) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut lines = packet.lines();

        while let Some(line) = lines.next() {
            let err = match self.forward(line).await {
                Ok(()) => {
                    summary.forwarded += 1;
                    metrics::counter!("statsd_proxy_lines_forwarded_total").increment(1);
                    continue;
                }
                Err(err) => err,
            };

            summary.dropped += 1;
            match &err {
                ProxyError::MalformedLine { .. } => {
                    warn!("dropping line: {}", err);
                    metrics::counter!("statsd_proxy_lines_dropped_total", "reason" => "malformed")
                        .increment(1);
                    if self.policy == MalformedLinePolicy::DropPacket {
                        let rest = lines.by_ref().count();
                        summary.dropped += rest;
                        metrics::counter!("statsd_proxy_lines_dropped_total", "reason" => "malformed")
                            .increment(rest as u64);
                        break;
                    }
                }
                ProxyError::BackendWrite { .. } => {
                    warn!("dropping line: {}", err);
                    metrics::counter!("statsd_proxy_lines_dropped_total", "reason" => "write")
                        .increment(1);
                }
                _ => {
                    debug!("dropping line: {}", err);
                    metrics::counter!("statsd_proxy_lines_dropped_total", "reason" => "unroutable")
                        .increment(1);
                }
            }
        }

        summary
    }

    async fn forward(&self, line: &[u8]) -> Result<()> {
        let key = metric_key(line).ok_or_else(|| ProxyError::MalformedLine {
            line: String::from_utf8_lossy(line).into_owned(),
        })?;

        let route = self.registry.route(key)?;
        if let Err(source) = route.connection.send(line).await {
            // The node may have been cycled since routing; only retire this socket.
            self.registry.mark_down_connection(&route.node, &route.connection);
            return Err(ProxyError::BackendWrite {
                node: route.node,
                source,
            });
        }
        Ok(())
    }

    /// Reads datagrams from `socket` until shutdown, spawning one task per
    /// datagram.
    #[instrument(level = "info", skip_all, fields(addr = ?socket.local_addr().ok()))]
    pub async fn serve(
        self: Arc<Self>,
        socket: UdpSocket,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("serving packets");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((0, _)) => continue,
                        Ok((n, peer)) => {
                            debug!("received {} bytes from {}", n, peer);
                            let packet = Packet::new(Bytes::copy_from_slice(&buf[..n]), n);
                            let dispatcher = Arc::clone(&self);
                            tokio::spawn(async move {
                                dispatcher.handle(&packet).await;
                            });
                        }
                        Err(e) => {
                            warn!("failed to receive packet: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping dispatcher");
                    break;
                }
            }
        }

        Ok(())
    }
}
