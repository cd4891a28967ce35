//! Transfer engine — the peer table and the host-facing surface.
//!
//! One `TransferEngine` per local node. It owns every peer's queues; the
//! host serializes access to it (the daemon keeps it behind one mutex).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use groundlink_core::config::TransferConfig;
use groundlink_core::wire::MAX_DATA_PAYLOAD;
use groundlink_core::{NodeDirectory, NodeId, Packet, TxId};

use crate::checkpoint;
use crate::error::{Result, TransferError};
use crate::incoming::ReceiveOutcome;
use crate::peer::PeerQueues;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Max DATA payload bytes.
    pub packet_size: usize,
    pub checkpoint_interval: Duration,
    pub max_holes_per_response: usize,
    pub incoming_waittime: Duration,
    pub outgoing_waittime: Duration,
}

impl TransferSettings {
    /// No rate limits at all. Every checkpoint is written, every retry fires.
    pub fn immediate() -> Self {
        Self {
            packet_size: 200,
            checkpoint_interval: Duration::ZERO,
            max_holes_per_response: 32,
            incoming_waittime: Duration::ZERO,
            outgoing_waittime: Duration::ZERO,
        }
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(c: &TransferConfig) -> Self {
        Self {
            packet_size: c.packet_size.clamp(1, MAX_DATA_PAYLOAD),
            checkpoint_interval: Duration::from_secs(c.checkpoint_interval_secs),
            max_holes_per_response: c.max_holes_per_response.max(1),
            incoming_waittime: Duration::from_secs(c.incoming_waittime_secs),
            outgoing_waittime: Duration::from_secs(c.outgoing_waittime_secs),
        }
    }
}

// ── Query rows ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingInfo {
    pub tx_id: TxId,
    pub file_name: String,
    pub agent_name: String,
    pub file_size: u64,
    pub node_name: String,
    pub enabled: bool,
    pub bytes_sent: u64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingInfo {
    pub tx_id: TxId,
    pub file_name: String,
    pub agent_name: String,
    pub file_size: u64,
    pub node_name: String,
    pub total_bytes: u64,
    pub metadata_received: bool,
    pub complete: bool,
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitDirection {
    Incoming,
    Outgoing,
    Both,
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TransferEngine {
    self_id: NodeId,
    self_name: String,
    data_root: PathBuf,
    settings: TransferSettings,
    peers: Vec<PeerQueues>,
    index: HashMap<NodeId, usize>,
}

impl TransferEngine {
    /// Build the peer table from `directory` (every node but `self_name`),
    /// create each peer's staging tree, and restore checkpoints.
    pub fn new(
        self_name: &str,
        directory: &NodeDirectory,
        data_root: impl Into<PathBuf>,
        settings: TransferSettings,
    ) -> Result<Self> {
        let data_root = data_root.into();
        let self_id = directory
            .lookup_id(self_name)
            .ok_or_else(|| TransferError::UnknownPeer(self_name.to_string()))?;

        let mut peers = Vec::new();
        let mut index = HashMap::new();
        for (id, name) in directory.iter() {
            if id == self_id {
                continue;
            }
            let mut peer = PeerQueues::new(id, name, &data_root, &settings);
            peer.layout.create_all()?;
            let restored = peer.restore_checkpoints();
            tracing::debug!(peer = %name, node_id = id, restored, "peer ready");
            index.insert(id, peers.len());
            peers.push(peer);
        }

        tracing::info!(
            node = %self_name,
            node_id = self_id,
            peers = peers.len(),
            root = %data_root.display(),
            "transfer engine initialised"
        );
        Ok(Self {
            self_id,
            self_name: self_name.to_string(),
            data_root,
            settings,
            peers,
            index,
        })
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// `(node_id, node_name)` of every peer.
    pub fn peers(&self) -> Vec<(NodeId, String)> {
        self.peers
            .iter()
            .map(|p| (p.node_id, p.node_name.clone()))
            .collect()
    }

    pub fn peer(&self, name: &str) -> Result<&PeerQueues> {
        self.peers
            .iter()
            .find(|p| p.node_name == name)
            .ok_or_else(|| TransferError::UnknownPeer(name.to_string()))
    }

    pub fn peer_mut(&mut self, name: &str) -> Result<&mut PeerQueues> {
        self.peers
            .iter_mut()
            .find(|p| p.node_name == name)
            .ok_or_else(|| TransferError::UnknownPeer(name.to_string()))
    }

    fn peer_by_id_mut(&mut self, id: NodeId) -> Result<&mut PeerQueues> {
        let pos = *self.index.get(&id).ok_or(TransferError::UnknownPeerId(id))?;
        Ok(&mut self.peers[pos])
    }

    // ── Queue mutation ────────────────────────────────────────────────────────

    pub fn load_directory(&mut self, peer: &str) -> Result<usize> {
        self.peer_mut(peer)?.load_directory()
    }

    /// Rescan every peer's outgoing area. Per-peer failures are logged.
    pub fn load_all(&mut self) -> usize {
        let mut total = 0;
        for peer in &mut self.peers {
            match peer.load_directory() {
                Ok(n) => total += n,
                Err(e) => {
                    tracing::warn!(peer = %peer.node_name, error = %e, "outgoing scan failed");
                }
            }
        }
        total
    }

    /// Write a checkpoint for every unfinished transaction, ignoring the
    /// rate limit. Returns how many were written.
    pub fn checkpoint_all(&mut self) -> usize {
        let mut saved = 0;
        for peer in &mut self.peers {
            let txs = peer.incoming.iter_mut().chain(peer.outgoing.iter_mut());
            for tx in txs.filter(|t| !t.complete) {
                match checkpoint::save_now(tx) {
                    Ok(()) => saved += 1,
                    Err(e) => tracing::warn!(
                        peer = %peer.node_name,
                        tx_id = tx.tx_id,
                        error = %e,
                        "checkpoint failed"
                    ),
                }
            }
        }
        saved
    }

    pub fn outgoing_add(&mut self, peer: &str, agent: &str, file_name: &str) -> Result<usize> {
        self.peer_mut(peer)?.outgoing_add(agent, file_name)
    }

    pub fn outgoing_del(&mut self, peer: &str, tx_id: TxId, remove_file: bool) -> Result<usize> {
        self.peer_mut(peer)?.outgoing_del(tx_id, remove_file)
    }

    pub fn incoming_del(&mut self, peer: &str, tx_id: TxId) -> Result<usize> {
        self.peer_mut(peer)?.incoming_del(tx_id)
    }

    // ── Packet flow ───────────────────────────────────────────────────────────

    pub fn harvest_packets(&mut self, peer: &str) -> Result<Vec<Packet>> {
        let origin = self.self_id;
        let settings = self.settings.clone();
        Ok(self.peer_mut(peer)?.harvest_packets(origin, &settings))
    }

    pub fn harvest_responses(&mut self, peer: &str) -> Result<Vec<Packet>> {
        let origin = self.self_id;
        let settings = self.settings.clone();
        Ok(self.peer_mut(peer)?.harvest_responses(origin, &settings))
    }

    /// Request and response passes for every peer, tagged with the node
    /// each packet is for.
    pub fn harvest_all(&mut self) -> Vec<(NodeId, Packet)> {
        let origin = self.self_id;
        let mut out = Vec::new();
        for peer in &mut self.peers {
            let id = peer.node_id;
            out.extend(
                peer.harvest_packets(origin, &self.settings)
                    .into_iter()
                    .map(|p| (id, p)),
            );
            out.extend(
                peer.harvest_responses(origin, &self.settings)
                    .into_iter()
                    .map(|p| (id, p)),
            );
        }
        out
    }

    /// Apply one received packet. Errors leave the queues untouched and are
    /// logged here; the caller may ignore them.
    pub fn receive(&mut self, packet: Packet) -> Result<ReceiveOutcome> {
        let origin = packet.origin();
        let kind = packet.kind();
        let tx_id = packet.tx_id();
        let self_name = self.self_name.clone();
        let settings = self.settings.clone();

        let result = self
            .peer_by_id_mut(origin)
            .and_then(|peer| peer.receive(packet, &self_name, &settings));
        if let Err(e) = &result {
            tracing::warn!(
                origin,
                kind = kind.name(),
                tx_id = ?tx_id,
                error = %e,
                "packet rejected"
            );
        }
        result
    }

    /// Decode and apply a raw payload.
    pub fn receive_bytes(&mut self, payload: &[u8]) -> Result<ReceiveOutcome> {
        let packet = Packet::decode(payload).map_err(|e| {
            tracing::debug!(len = payload.len(), error = %e, "undecodable packet");
            TransferError::from(e)
        })?;
        self.receive(packet)
    }

    // ── Query surface ─────────────────────────────────────────────────────────

    pub fn list_outgoing(&self) -> Vec<OutgoingInfo> {
        self.peers
            .iter()
            .flat_map(|p| {
                p.outgoing.iter().map(|t| OutgoingInfo {
                    tx_id: t.tx_id,
                    file_name: t.file_name.clone(),
                    agent_name: t.agent_name.clone(),
                    file_size: t.file_size,
                    node_name: p.node_name.clone(),
                    enabled: t.enabled,
                    bytes_sent: t.total_bytes(),
                    complete: t.complete,
                })
            })
            .collect()
    }

    pub fn list_incoming(&self) -> Vec<IncomingInfo> {
        self.peers
            .iter()
            .flat_map(|p| {
                p.incoming.iter().map(|t| IncomingInfo {
                    tx_id: t.tx_id,
                    file_name: t.file_name.clone(),
                    agent_name: t.agent_name.clone(),
                    file_size: t.file_size,
                    node_name: p.node_name.clone(),
                    total_bytes: t.total_bytes(),
                    metadata_received: t.sent_metadata,
                    complete: t.complete,
                    failed: t.failed,
                })
            })
            .collect()
    }

    /// Enable the outgoing file named `file_name` for `peer` and disable all
    /// others. Returns how many transactions are enabled.
    pub fn enable_single(&mut self, peer: &str, file_name: &str) -> Result<usize> {
        let peer = self.peer_mut(peer)?;
        if peer.outgoing.iter().all(|t| t.file_name != file_name) {
            return Err(TransferError::NoMatch);
        }
        let mut enabled = 0;
        for tx in peer.outgoing.iter_mut() {
            tx.enabled = tx.file_name == file_name;
            enabled += usize::from(tx.enabled);
        }
        tracing::info!(peer = %peer.node_name, file = %file_name, "single file enabled");
        Ok(enabled)
    }

    /// Enable every outgoing transaction for `peer`.
    pub fn enable_all(&mut self, peer: &str) -> Result<usize> {
        let peer = self.peer_mut(peer)?;
        for tx in peer.outgoing.iter_mut() {
            tx.enabled = true;
        }
        Ok(peer.outgoing.len())
    }

    pub fn set_enabled(&mut self, peer: &str, tx_id: TxId, enabled: bool) -> Result<()> {
        let tx = self
            .peer_mut(peer)?
            .outgoing
            .get_mut(tx_id)
            .ok_or(TransferError::NoMatch)?;
        tx.enabled = enabled;
        Ok(())
    }

    pub fn set_waittime(
        &mut self,
        peer: &str,
        direction: WaitDirection,
        waittime: Duration,
    ) -> Result<()> {
        let peer = self.peer_mut(peer)?;
        if direction != WaitDirection::Outgoing {
            peer.incoming.waittime = waittime;
        }
        if direction != WaitDirection::Incoming {
            peer.outgoing.waittime = waittime;
        }
        Ok(())
    }

    pub fn packet_size(&self) -> usize {
        self.settings.packet_size
    }

    /// Clamped so one DATA packet always fits a UDP datagram. Returns the
    /// size in effect.
    pub fn set_packet_size(&mut self, size: usize) -> usize {
        self.settings.packet_size = size.clamp(1, MAX_DATA_PAYLOAD);
        self.settings.packet_size
    }
}
