//! Response reassembler — correlates multi-chunk replies with the callers
//! waiting for them.
//!
//! A fixed pool of slots. `register` binds a callback to a free slot; reply
//! chunks accumulate in it by index; `try_resolve` fires the callback once
//! every chunk is present or the slot has gone quiet for `timeout`, then
//! frees the slot. The callback is `FnOnce`, so it cannot fire twice.

use std::time::{Duration, Instant};

use crate::error::{Result, TransferError};

pub type ResponseCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

#[derive(Default)]
struct Slot {
    callback: Option<ResponseCallback>,
    chunks: Vec<Option<Vec<u8>>>,
    last_arrival: Option<Instant>,
}

impl Slot {
    fn reset(&mut self) {
        *self = Slot::default();
    }

    fn all_present(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(Option::is_some)
    }
}

pub struct ResponseReassembler {
    slots: Vec<Slot>,
    cursor: usize,
}

impl std::fmt::Debug for ResponseReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseReassembler")
            .field("slots", &self.slots.len())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl ResponseReassembler {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| Slot::default()).collect(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.callback.is_some()).count()
    }

    pub fn is_available(&self, slot_id: usize) -> bool {
        self.slots
            .get(slot_id)
            .is_some_and(|s| s.callback.is_none())
    }

    /// Bind `callback` to the first free slot at or after the cursor.
    pub fn register(&mut self, callback: ResponseCallback) -> Result<usize> {
        let n = self.slots.len();
        for step in 0..n {
            let id = (self.cursor + step) % n;
            if self.slots[id].callback.is_none() {
                let slot = &mut self.slots[id];
                slot.reset();
                slot.callback = Some(callback);
                slot.last_arrival = Some(Instant::now());
                self.cursor = (id + 1) % n;
                return Ok(id);
            }
        }
        Err(TransferError::NoSlots)
    }

    /// Store one reply chunk. A chunk index seen before is ignored.
    pub fn insert(
        &mut self,
        slot_id: usize,
        chunk_index: usize,
        total_chunks: usize,
        payload: &[u8],
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(slot_id)
            .ok_or(TransferError::InvalidIndex(slot_id))?;
        if slot.callback.is_none() {
            return Err(TransferError::NoMatch);
        }
        if slot.chunks.is_empty() {
            if total_chunks == 0 {
                return Err(TransferError::InvalidIndex(0));
            }
            slot.chunks.resize_with(total_chunks, || None);
        }
        let entry = slot
            .chunks
            .get_mut(chunk_index)
            .ok_or(TransferError::InvalidIndex(chunk_index))?;
        if entry.is_none() {
            *entry = Some(payload.to_vec());
        }
        slot.last_arrival = Some(Instant::now());
        Ok(())
    }

    /// Fire the slot's callback if the reply is whole or has timed out.
    /// Returns whether it fired.
    pub fn try_resolve(&mut self, slot_id: usize, timeout: Duration) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(slot_id)
            .ok_or(TransferError::InvalidIndex(slot_id))?;
        if slot.callback.is_none() {
            return Ok(false);
        }
        let timed_out = slot
            .last_arrival
            .map_or(true, |t| t.elapsed() >= timeout);
        if !slot.all_present() && !timed_out {
            return Ok(false);
        }

        let payload: Vec<u8> = slot.chunks.iter().flatten().flatten().copied().collect();
        let missing = slot.chunks.iter().filter(|c| c.is_none()).count();
        let callback = slot.callback.take();
        slot.reset();
        if missing > 0 {
            tracing::debug!(slot_id, missing, "response resolved by timeout");
        }
        if let Some(cb) = callback {
            cb(payload);
        }
        Ok(true)
    }

    /// Run `try_resolve` over every bound slot. Returns how many fired.
    pub fn resolve_expired(&mut self, timeout: Duration) -> usize {
        let mut fired = 0;
        for id in 0..self.slots.len() {
            if let Ok(true) = self.try_resolve(id, timeout) {
                fired += 1;
            }
        }
        fired
    }

    /// Free a slot without firing its callback.
    pub fn abandon(&mut self, slot_id: usize) -> Result<()> {
        let slot = self
            .slots
            .get_mut(slot_id)
            .ok_or(TransferError::InvalidIndex(slot_id))?;
        slot.reset();
        Ok(())
    }
}
