//! Peer table entry — one remote node and its pair of transfer queues.

use std::path::Path;

use groundlink_core::{NodeId, TxId};

use crate::checkpoint::{self, CheckpointRecord};
use crate::engine::TransferSettings;
use crate::error::{Result, TransferError};
use crate::layout::{self, StagingLayout};
use crate::queue::TransferQueue;
use crate::transaction::{remove_if_present, Direction, Transaction};

/// Transfer state shared with one peer.
///
/// Operations on a `PeerQueues` assume exclusive access for their whole
/// duration; the engine owner serializes callers.
#[derive(Debug)]
pub struct PeerQueues {
    pub node_id: NodeId,
    pub node_name: String,
    pub layout: StagingLayout,
    pub incoming: TransferQueue,
    pub outgoing: TransferQueue,
}

impl PeerQueues {
    pub fn new(
        node_id: NodeId,
        node_name: &str,
        data_root: &Path,
        settings: &TransferSettings,
    ) -> Self {
        Self {
            node_id,
            node_name: node_name.to_string(),
            layout: StagingLayout::new(data_root, node_name),
            incoming: TransferQueue::new(settings.incoming_waittime),
            outgoing: TransferQueue::new(settings.outgoing_waittime),
        }
    }

    pub fn queue(&self, direction: Direction) -> &TransferQueue {
        match direction {
            Direction::Incoming => &self.incoming,
            Direction::Outgoing => &self.outgoing,
        }
    }

    pub fn queue_mut(&mut self, direction: Direction) -> &mut TransferQueue {
        match direction {
            Direction::Incoming => &mut self.incoming,
            Direction::Outgoing => &mut self.outgoing,
        }
    }

    /// A fresh record whose staging paths follow this peer's layout.
    pub(crate) fn new_transaction(&self, direction: Direction, tx_id: TxId) -> Transaction {
        Transaction::new(
            tx_id,
            direction,
            &self.node_name,
            self.layout.staging_base(direction, tx_id),
        )
    }

    // ── Restore ───────────────────────────────────────────────────────────────

    /// Re-insert every checkpointed transaction found in temp/file.
    /// Unreadable or inconsistent checkpoints are logged and deleted so the
    /// transfer starts over. Returns the number of records restored.
    pub fn restore_checkpoints(&mut self) -> usize {
        let mut restored = 0;
        for (direction, path) in self.layout.checkpoint_files() {
            let result = checkpoint::restore(&path)
                .and_then(|record| self.restore_one(direction, record));
            match result {
                Ok(tx_id) => {
                    restored += 1;
                    tracing::info!(
                        peer = %self.node_name,
                        tx_id,
                        direction = direction.prefix(),
                        "transaction restored from checkpoint"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %self.node_name,
                        path = %path.display(),
                        error = %e,
                        "discarding checkpoint"
                    );
                    remove_if_present(&path);
                    if direction == Direction::Incoming {
                        remove_if_present(&path.with_extension("file"));
                    }
                }
            }
        }
        // Fully received before the restart but never moved into place.
        let settled = self.finalize_pending();
        if settled > 0 {
            tracing::info!(peer = %self.node_name, settled, "finalized restored transactions");
        }
        restored
    }

    fn restore_one(&mut self, direction: Direction, record: CheckpointRecord) -> Result<TxId> {
        if record.node_name != self.node_name {
            return Err(TransferError::UnknownPeer(record.node_name));
        }
        if record.tx_id == 0 {
            return Err(TransferError::InvalidIndex(0));
        }

        let mut tx = self.new_transaction(direction, record.tx_id);
        tx.file_size = record.file_size;
        tx.coverage = record.coverage;

        match direction {
            Direction::Outgoing => {
                layout::validate_agent_name(&record.agent_name)?;
                layout::validate_file_name(&record.file_name)?;
                let source = self.layout.outgoing_path(&record.agent_name, &record.file_name);
                let found = std::fs::metadata(&source)
                    .map_err(|e| TransferError::io(format!("source {}", source.display()), e))?
                    .len();
                if found != record.file_size {
                    return Err(TransferError::FileSizeMismatch {
                        path: source,
                        queued: record.file_size,
                        found,
                    });
                }
                tx.final_path = source;
                tx.sent_all_data = tx.coverage.is_complete(tx.file_size);
            }
            Direction::Incoming => {
                if !record.file_name.is_empty() {
                    layout::validate_agent_name(&record.agent_name)?;
                    layout::validate_file_name(&record.file_name)?;
                    tx.final_path = self
                        .layout
                        .incoming_path(&record.agent_name, &record.file_name);
                    tx.sent_metadata = record.file_size > 0;
                }
                if !tx.staging_file().exists() {
                    tx.coverage.clear();
                }
            }
        }
        tx.agent_name = record.agent_name;
        tx.file_name = record.file_name;

        let tx_id = tx.tx_id;
        let queue = self.queue_mut(direction);
        queue.insert(tx)?;
        queue.announce = true;
        Ok(tx_id)
    }
}
