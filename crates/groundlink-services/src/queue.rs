//! Transfer queue: fixed-capacity slot table of transactions for one peer
//! and one direction, plus the direction-wide control state.

use std::time::Duration;

use groundlink_core::wire::{QueueBitmap, TxId, TRANSFER_QUEUE_LIMIT};

use crate::error::{Result, TransferError};
use crate::transaction::Transaction;

/// Highest usable tx_id. Slot 0 is never occupied.
pub const MAX_TX_ID: TxId = (TRANSFER_QUEUE_LIMIT - 1) as TxId;

/// Search start per decimal digit count of the file size:
/// `256 - ceil(256^((6 - digits) / 6))`, clamped to `[1, 255]`.
/// Small files land low in the id space, large ones high.
const START_BY_DIGITS: [TxId; 7] = [1, 154, 215, 240, 249, 253, 255];

#[derive(Debug)]
pub struct TransferQueue {
    slots: Vec<Option<Transaction>>,
    count: usize,
    /// Minimum gap between retries (REQUEST-COMPLETE, REQUEST-METADATA).
    pub waittime: Duration,
    /// The queue bitmap must be re-announced on the next harvest.
    pub announce: bool,
    responses: Vec<TxId>,
}

impl TransferQueue {
    pub fn new(waittime: Duration) -> Self {
        Self {
            slots: (0..TRANSFER_QUEUE_LIMIT).map(|_| None).collect(),
            count: 0,
            waittime,
            announce: true,
            responses: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= MAX_TX_ID as usize
    }

    pub fn is_free(&self, tx_id: TxId) -> bool {
        tx_id != 0 && self.slots[tx_id as usize].is_none()
    }

    pub fn contains(&self, tx_id: TxId) -> bool {
        tx_id != 0 && self.slots[tx_id as usize].is_some()
    }

    pub fn get(&self, tx_id: TxId) -> Option<&Transaction> {
        self.slots.get(tx_id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, tx_id: TxId) -> Option<&mut Transaction> {
        self.slots.get_mut(tx_id as usize)?.as_mut()
    }

    /// Place a record in the slot its tx_id names.
    pub fn insert(&mut self, tx: Transaction) -> Result<()> {
        let id = tx.tx_id;
        if id == 0 {
            return Err(TransferError::InvalidIndex(0));
        }
        if self.contains(id) {
            return Err(TransferError::Duplicate(id));
        }
        if self.is_full() {
            return Err(TransferError::QueueFull);
        }
        self.slots[id as usize] = Some(tx);
        self.count += 1;
        Ok(())
    }

    /// Take a record out, releasing its file handle.
    pub fn remove(&mut self, tx_id: TxId) -> Option<Transaction> {
        if tx_id == 0 {
            return None;
        }
        let mut tx = self.slots[tx_id as usize].take()?;
        tx.close();
        self.count -= 1;
        Some(tx)
    }

    /// Recompute the occupied count from the slots.
    pub fn recount(&mut self) -> usize {
        self.count = self.slots.iter().filter(|s| s.is_some()).count();
        self.count
    }

    /// Occupied tx_ids in ascending order.
    pub fn tx_ids(&self) -> Vec<TxId> {
        self.iter().map(|t| t.tx_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transaction> {
        self.slots.iter_mut().flatten()
    }

    pub fn find_by_file(&self, agent: &str, file_name: &str) -> Option<TxId> {
        self.iter()
            .find(|t| t.agent_name == agent && t.file_name == file_name)
            .map(|t| t.tx_id)
    }

    pub fn bitmap(&self) -> QueueBitmap {
        QueueBitmap::from_ids(self.iter().map(|t| t.tx_id))
    }

    /// Pick a free tx_id for a file of `file_size` bytes.
    pub fn allocate(&self, file_size: u64) -> Result<TxId> {
        if self.is_full() {
            return Err(TransferError::QueueFull);
        }
        let mut id = start_for_size(file_size);
        for _ in 0..MAX_TX_ID {
            if self.is_free(id) {
                return Ok(id);
            }
            id = if id == MAX_TX_ID { 1 } else { id + 1 };
        }
        Err(TransferError::QueueFull)
    }

    /// Remember that `tx_id` owes the peer a response. Duplicates collapse.
    pub fn push_response(&mut self, tx_id: TxId) {
        if !self.responses.contains(&tx_id) {
            self.responses.push(tx_id);
        }
    }

    pub fn pending_responses(&self) -> &[TxId] {
        &self.responses
    }

    pub fn take_responses(&mut self) -> Vec<TxId> {
        std::mem::take(&mut self.responses)
    }
}

fn start_for_size(file_size: u64) -> TxId {
    let digits = file_size.checked_ilog10().unwrap_or(0) as usize;
    START_BY_DIGITS[digits.min(START_BY_DIGITS.len() - 1)]
}
