//! UDP link — stands in for the radio between nodes.
//!
//! One socket per daemon. Each datagram carries exactly one encoded
//! packet. Peer addresses come from `[[link.peers]]` and are refreshed
//! from the source address of every packet that decodes cleanly.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::UdpSocket;

use groundlink_core::config::PeerAddr;
use groundlink_core::{NodeDirectory, NodeId, Packet};

/// Largest datagram the link accepts.
pub const MAX_DATAGRAM: usize = 65_536;

#[derive(Clone)]
pub struct Link {
    socket: Arc<UdpSocket>,
    addresses: Arc<DashMap<NodeId, SocketAddr>>,
}

impl Link {
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind link socket on {}", bind_addr))?;
        Ok(Self {
            socket: Arc::new(socket),
            addresses: Arc::new(DashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("link socket has no local address")
    }

    /// Seed the address book from config. Entries naming unknown nodes or
    /// carrying unparsable addresses are skipped with a warning.
    pub fn add_static_peers(&self, peers: &[PeerAddr], directory: &NodeDirectory) {
        for peer in peers {
            let Some(id) = directory.lookup_id(&peer.name) else {
                tracing::warn!(peer = %peer.name, "static peer not in node directory, skipping");
                continue;
            };
            match peer.addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.addresses.insert(id, addr);
                    tracing::info!(peer = %peer.name, node_id = id, %addr, "static peer address");
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %peer.name,
                        addr = %peer.addr,
                        error = %e,
                        "bad peer address, skipping"
                    );
                }
            }
        }
    }

    pub fn learn(&self, node_id: NodeId, addr: SocketAddr) {
        let previous = self.addresses.insert(node_id, addr);
        if previous != Some(addr) {
            tracing::debug!(node_id, %addr, "peer address learned");
        }
    }

    pub fn address(&self, node_id: NodeId) -> Option<SocketAddr> {
        self.addresses.get(&node_id).map(|a| *a)
    }

    /// Encode and send one packet. Returns false when the peer's address
    /// is not known yet.
    pub async fn send(&self, node_id: NodeId, packet: &Packet) -> Result<bool> {
        let Some(addr) = self.address(node_id) else {
            return Ok(false);
        };
        let bytes = packet
            .encode()
            .with_context(|| format!("failed to encode {}", packet.kind().name()))?;
        self.socket
            .send_to(&bytes, addr)
            .await
            .with_context(|| format!("send_to {} failed", addr))?;
        tracing::trace!(node_id, kind = packet.kind().name(), len = bytes.len(), "packet sent");
        Ok(true)
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.context("recv_from failed")
    }
}
