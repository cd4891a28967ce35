//! Outgoing transaction manager.
//!
//! Discovers files in a peer's outgoing area, and on every harvest pass
//! decides what each outgoing transaction emits next: METADATA first, then
//! one DATA chunk per pass, then REQUEST-COMPLETE until the peer confirms,
//! then CANCEL. A QUEUE bitmap goes out whenever the queue has changed.

use std::io::{Read, Seek, SeekFrom};
use std::time::Instant;

use bytes::Bytes;
use groundlink_core::{NodeId, Packet, QueueBitmap, TxId};

use crate::checkpoint;
use crate::coverage::ChunkRange;
use crate::engine::TransferSettings;
use crate::error::{Result, TransferError};
use crate::layout::{self, OutgoingFile};
use crate::peer::PeerQueues;
use crate::transaction::{remove_if_present, Direction, Transaction};

impl PeerQueues {
    /// Scan this peer's outgoing area and queue every new file, smallest
    /// first, until the queue is full. Queued transactions whose source
    /// file has vanished are dropped first. Returns the queue size.
    pub fn load_directory(&mut self) -> Result<usize> {
        let vanished: Vec<TxId> = self
            .outgoing
            .iter()
            .filter(|t| !t.final_path.exists())
            .map(|t| t.tx_id)
            .collect();
        for tx_id in vanished {
            tracing::info!(peer = %self.node_name, tx_id, "source file gone, dropping transaction");
            self.outgoing_del(tx_id, false)?;
        }

        for file in self.layout.outgoing_files()? {
            if self.outgoing.is_full() {
                tracing::debug!(peer = %self.node_name, "outgoing queue full, deferring rest");
                break;
            }
            if file.size == 0 {
                continue;
            }
            match self.add_file(&file) {
                Ok(_) => {}
                Err(TransferError::FileSizeMismatch { path, queued, found }) => {
                    tracing::info!(
                        peer = %self.node_name,
                        path = %path.display(),
                        queued,
                        found,
                        "source file changed size, requeueing"
                    );
                    if let Err(e) = self.add_file(&file) {
                        tracing::warn!(peer = %self.node_name, error = %e, "requeue failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %self.node_name,
                        path = %file.path.display(),
                        error = %e,
                        "failed to queue outgoing file"
                    );
                }
            }
        }
        Ok(self.outgoing.recount())
    }

    /// Queue `outgoing/<agent>/<file_name>` for this peer. Returns the
    /// queue size.
    pub fn outgoing_add(&mut self, agent: &str, file_name: &str) -> Result<usize> {
        layout::validate_agent_name(agent)?;
        layout::validate_file_name(file_name)?;
        let path = self.layout.outgoing_path(agent, file_name);
        let meta = std::fs::metadata(&path)
            .map_err(|e| TransferError::io(format!("failed to stat {}", path.display()), e))?;
        if !meta.is_file() {
            return Err(TransferError::InvalidFilename(path.display().to_string()));
        }
        self.add_file(&OutgoingFile {
            agent_name: agent.to_string(),
            file_name: file_name.to_string(),
            path,
            size: meta.len(),
        })
    }

    fn add_file(&mut self, file: &OutgoingFile) -> Result<usize> {
        if file.size == 0 {
            return Err(TransferError::ZeroLengthFile(file.path.clone()));
        }
        layout::validate_agent_name(&file.agent_name)?;
        layout::validate_file_name(&file.file_name)?;

        if let Some(existing) = self.outgoing.find_by_file(&file.agent_name, &file.file_name) {
            let queued = self.outgoing.get(existing).map(|t| t.file_size).unwrap_or(0);
            if queued == file.size {
                return Ok(self.outgoing.recount());
            }
            self.outgoing_del(existing, false)?;
            return Err(TransferError::FileSizeMismatch {
                path: file.path.clone(),
                queued,
                found: file.size,
            });
        }

        let tx_id = self.outgoing.allocate(file.size)?;
        let mut tx = self.new_transaction(Direction::Outgoing, tx_id);
        tx.agent_name = file.agent_name.clone();
        tx.file_name = file.file_name.clone();
        tx.final_path = file.path.clone();
        tx.file_size = file.size;
        checkpoint::save_now(&mut tx)?;

        self.outgoing.insert(tx)?;
        self.outgoing.announce = true;
        tracing::info!(
            peer = %self.node_name,
            tx_id,
            file = %file.file_name,
            agent = %file.agent_name,
            size = file.size,
            "outgoing transaction queued"
        );
        Ok(self.outgoing.len())
    }

    /// Drop an outgoing transaction and its checkpoint, optionally removing
    /// the source file as well. Returns the queue size.
    pub fn outgoing_del(&mut self, tx_id: TxId, remove_file: bool) -> Result<usize> {
        let mut tx = self.outgoing.remove(tx_id).ok_or(TransferError::NoMatch)?;
        tx.remove_staging();
        if remove_file {
            remove_if_present(&tx.final_path);
        }
        self.outgoing.announce = true;
        tracing::debug!(peer = %self.node_name, tx_id, remove_file, "outgoing transaction removed");
        Ok(self.outgoing.recount())
    }

    // ── Harvest ───────────────────────────────────────────────────────────────

    /// One request-side pass over the outgoing queue, ascending tx_id.
    pub fn harvest_packets(&mut self, origin: NodeId, settings: &TransferSettings) -> Vec<Packet> {
        let now = Instant::now();
        let mut packets = Vec::new();
        let mut finished = Vec::new();
        let announce = self.outgoing.announce;
        let waittime = self.outgoing.waittime;
        let mut bitmap = QueueBitmap::new();

        for tx in self.outgoing.iter_mut() {
            if !tx.sent_metadata {
                packets.push(Packet::Metadata {
                    origin,
                    tx_id: tx.tx_id,
                    file_name: tx.file_name.clone(),
                    file_size: tx.file_size,
                    agent_name: tx.agent_name.clone(),
                });
                tx.sent_metadata = true;
            } else if tx.enabled && !tx.sent_all_data {
                if let Some(packet) = next_data(tx, origin, settings) {
                    packets.push(packet);
                }
            } else if tx.enabled {
                if tx.complete {
                    packets.push(Packet::Cancel {
                        origin,
                        tx_id: tx.tx_id,
                    });
                    finished.push(tx.tx_id);
                    continue;
                }
                if tx.next_retry.map_or(true, |t| now >= t) {
                    packets.push(Packet::ReqComplete {
                        origin,
                        tx_id: tx.tx_id,
                    });
                    tx.next_retry = Some(now + waittime);
                }
            }

            if announce {
                bitmap.set(tx.tx_id);
            }
        }

        for tx_id in finished {
            tracing::info!(peer = %self.node_name, tx_id, "outgoing transfer finished");
            if let Err(e) = self.outgoing_del(tx_id, true) {
                tracing::warn!(peer = %self.node_name, tx_id, error = %e, "failed to drop finished transaction");
            }
        }

        if announce && !bitmap.is_empty() {
            packets.push(Packet::Queue {
                origin,
                peer_name: self.node_name.clone(),
                bitmap,
            });
            self.outgoing.announce = false;
            tracing::debug!(peer = %self.node_name, bitmap = %hex::encode(bitmap.0), "queue announced");
        }
        packets
    }
}

/// Read the next unsent run of `tx` (at most `packet_size` bytes) and
/// record it as sent. Returns `None` when nothing is left or the read
/// failed; a failed read marks the transaction finished so the peer is
/// told to drop it.
fn next_data(tx: &mut Transaction, origin: NodeId, settings: &TransferSettings) -> Option<Packet> {
    let Some(hole) = tx.coverage.missing_ranges(tx.file_size, 1).pop() else {
        tx.sent_all_data = true;
        tx.close();
        save_checkpoint(tx, settings, true);
        return None;
    };

    let len = hole.len().min(settings.packet_size.max(1) as u64) as usize;
    let mut buf = vec![0u8; len];
    let read = tx.open_read().and_then(|f| {
        f.seek(SeekFrom::Start(hole.start))?;
        f.read_exact(&mut buf)
    });
    if let Err(e) = read {
        tracing::warn!(
            tx_id = tx.tx_id,
            path = %tx.final_path.display(),
            error = %e,
            "read failed, abandoning transfer"
        );
        tx.close();
        tx.sent_all_data = true;
        tx.complete = true;
        return None;
    }

    tx.coverage
        .add_range(ChunkRange::new(hole.start, hole.start + len as u64 - 1));
    tx.touch();
    let done = tx.is_fully_covered();
    if done {
        tx.sent_all_data = true;
        tx.close();
    }
    save_checkpoint(tx, settings, done);

    Some(Packet::Data {
        origin,
        tx_id: tx.tx_id,
        chunk_start: hole.start,
        bytes: Bytes::from(buf),
    })
}

fn save_checkpoint(tx: &mut Transaction, settings: &TransferSettings, force: bool) {
    let result = if force {
        checkpoint::save_now(tx)
    } else {
        checkpoint::save(tx, settings.checkpoint_interval).map(|_| ())
    };
    if let Err(e) = result {
        tracing::warn!(tx_id = tx.tx_id, error = %e, "checkpoint failed");
    }
}
