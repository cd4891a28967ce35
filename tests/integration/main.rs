//! Groundlink integration test harness.
//!
//! Runs two transfer engines in-process, "sat" (node 1) and "ground"
//! (node 2), each over its own temporary data root. Packets travel
//! through `pump`, which encodes and decodes every packet like the real
//! link and lets a test drop, duplicate or inspect traffic on the way.
//!
//!   cargo test --test integration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use groundlink_core::config::NodeEntry;
use groundlink_core::{NodeDirectory, Packet};
use groundlink_services::{TransferEngine, TransferSettings};

mod failures;
mod files;
mod recovery;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SAT: &str = "sat";
pub const GROUND: &str = "ground";

pub fn directory() -> NodeDirectory {
    NodeDirectory::from_entries(&[
        NodeEntry { name: SAT.into(), id: 1 },
        NodeEntry { name: GROUND.into(), id: 2 },
    ])
}

/// No rate limits and 100-byte DATA payloads.
pub fn settings() -> TransferSettings {
    TransferSettings {
        packet_size: 100,
        ..TransferSettings::immediate()
    }
}

pub struct Node {
    pub name: &'static str,
    pub root: TempDir,
    pub engine: TransferEngine,
}

impl Node {
    pub fn new(name: &'static str) -> Result<Self> {
        let root = tempfile::tempdir().context("failed to create data root")?;
        let engine = TransferEngine::new(name, &directory(), root.path(), settings())?;
        Ok(Self { name, root, engine })
    }

    /// Drop the engine and build a fresh one over the same data root, the
    /// way a daemon restart would.
    pub fn restart(self) -> Result<Self> {
        let Node { name, root, engine } = self;
        drop(engine);
        let engine = TransferEngine::new(name, &directory(), root.path(), settings())?;
        Ok(Self { name, root, engine })
    }

    /// Place a file in the outgoing area for `peer` and queue it.
    pub fn stage(&mut self, peer: &str, agent: &str, file: &str, content: &[u8]) -> Result<()> {
        let dir = self.root.path().join(peer).join("outgoing").join(agent);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(file), content)?;
        self.engine.load_directory(peer)?;
        Ok(())
    }

    pub fn incoming_path(&self, peer: &str, agent: &str, file: &str) -> PathBuf {
        self.root.path().join(peer).join("incoming").join(agent).join(file)
    }

    pub fn temp_dir(&self, peer: &str) -> PathBuf {
        self.root.path().join(peer).join("temp").join("file")
    }
}

/// What `pump` should do with a packet in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Duplicate,
}

pub fn deliver_all(_: &Packet) -> Fate {
    Fate::Deliver
}

/// Harvest every packet `from` has for `to` and deliver it according to
/// `fate`. Returns the packets that reached `to`.
pub fn pump(from: &mut Node, to: &mut Node, fate: &mut dyn FnMut(&Packet) -> Fate) -> Vec<Packet> {
    let to_id = directory().lookup_id(to.name).unwrap();
    let mut delivered = Vec::new();
    for (node_id, packet) in from.engine.harvest_all() {
        if node_id != to_id {
            continue;
        }
        let bytes = packet.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);

        let copies = match fate(&decoded) {
            Fate::Deliver => 1,
            Fate::Drop => 0,
            Fate::Duplicate => 2,
        };
        for _ in 0..copies {
            // rejections are part of normal protocol noise
            let _ = to.engine.receive(decoded.clone());
        }
        if copies > 0 {
            delivered.push(decoded);
        }
    }
    delivered
}

/// Run both directions until `done` holds or `rounds` passes elapse.
/// Returns the number of rounds used.
pub fn run_until(
    a: &mut Node,
    b: &mut Node,
    rounds: usize,
    a_to_b: &mut dyn FnMut(&Packet) -> Fate,
    b_to_a: &mut dyn FnMut(&Packet) -> Fate,
    mut done: impl FnMut(&Node, &Node) -> bool,
) -> Option<usize> {
    for round in 1..=rounds {
        pump(a, b, a_to_b);
        pump(b, a, b_to_a);
        if done(a, b) {
            return Some(round);
        }
    }
    None
}

/// Received and the sender has forgotten it.
pub fn transfer_finished(sat: &Node, ground: &Node, path: &Path) -> bool {
    path.exists() && sat.engine.list_outgoing().is_empty() && ground.engine.list_incoming().is_empty()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

pub fn is_data(p: &Packet) -> Option<u64> {
    match p {
        Packet::Data { chunk_start, .. } => Some(*chunk_start),
        _ => None,
    }
}
