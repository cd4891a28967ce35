//! Incoming transaction manager: applies received packets to this peer's
//! queues, assembles file data in temp/file, and finalizes finished files.

use std::io::{Seek, SeekFrom, Write};
use std::time::Instant;

use groundlink_core::{NodeId, Packet, QueueBitmap, TxId};

use crate::checkpoint;
use crate::coverage::ChunkRange;
use crate::engine::TransferSettings;
use crate::error::{IoContext, Result, TransferError};
use crate::layout;
use crate::peer::PeerQueues;
use crate::transaction::{remove_if_present, Direction, Transaction};

/// What the host should do after a packet was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Handled,
    /// A response is owed; harvest responses for this peer soon.
    ResponseRequired,
}

impl PeerQueues {
    /// Apply one packet that `self` sent us. `self_name` is this node's name,
    /// used to ignore QUEUE and REQUEST-METADATA addressed elsewhere.
    pub fn receive(
        &mut self,
        packet: Packet,
        self_name: &str,
        settings: &TransferSettings,
    ) -> Result<ReceiveOutcome> {
        match packet {
            Packet::Queue {
                peer_name, bitmap, ..
            } => {
                if peer_name != self_name {
                    tracing::debug!(peer = %self.node_name, to = %peer_name, "QUEUE for another node");
                    return Ok(ReceiveOutcome::Handled);
                }
                self.apply_queue(&bitmap)
            }
            Packet::ReqMeta {
                peer_name, tx_ids, ..
            } => {
                if peer_name != self_name {
                    return Ok(ReceiveOutcome::Handled);
                }
                for tx_id in tx_ids {
                    if let Some(tx) = self.outgoing.get_mut(tx_id) {
                        tx.sent_metadata = false;
                    }
                }
                self.outgoing.announce = true;
                Ok(ReceiveOutcome::Handled)
            }
            Packet::Metadata {
                tx_id,
                file_name,
                file_size,
                agent_name,
                ..
            } => self.apply_metadata(tx_id, file_name, file_size, agent_name),
            Packet::ReqData {
                tx_id,
                hole_start,
                hole_end,
                ..
            } => self.apply_request_data(tx_id, hole_start, hole_end, settings),
            Packet::Data {
                tx_id,
                chunk_start,
                bytes,
                ..
            } => self.apply_data(tx_id, chunk_start, &bytes, settings),
            Packet::ReqComplete { tx_id, .. } => {
                if !self.incoming.contains(tx_id) {
                    self.incoming_add(tx_id)?;
                }
                self.incoming.push_response(tx_id);
                Ok(ReceiveOutcome::ResponseRequired)
            }
            Packet::Complete { tx_id, .. } => {
                let tx = self.outgoing.get_mut(tx_id).ok_or(TransferError::NoMatch)?;
                tx.complete = true;
                tx.sent_all_data = true;
                tx.sent_metadata = true;
                tx.close();
                tracing::info!(peer = %self.node_name, tx_id, "peer confirmed receipt");
                Ok(ReceiveOutcome::Handled)
            }
            Packet::Cancel { tx_id, .. } => {
                self.incoming_del(tx_id)?;
                Ok(ReceiveOutcome::Handled)
            }
        }
    }

    fn apply_queue(&mut self, bitmap: &QueueBitmap) -> Result<ReceiveOutcome> {
        let mut outcome = ReceiveOutcome::Handled;
        for tx_id in 1..=u8::MAX {
            let announced = bitmap.is_set(tx_id);
            let known = self.incoming.contains(tx_id);
            if announced && !known {
                match self.incoming_add(tx_id) {
                    Ok(_) => outcome = ReceiveOutcome::ResponseRequired,
                    Err(e) => {
                        tracing::warn!(peer = %self.node_name, tx_id, error = %e, "cannot track announced transaction");
                    }
                }
            } else if !announced && known {
                tracing::info!(peer = %self.node_name, tx_id, "peer abandoned transaction");
                self.incoming_del(tx_id)?;
            }
        }
        Ok(outcome)
    }

    fn apply_metadata(
        &mut self,
        tx_id: TxId,
        file_name: String,
        file_size: u64,
        agent_name: String,
    ) -> Result<ReceiveOutcome> {
        layout::validate_file_name(&file_name)?;
        layout::validate_agent_name(&agent_name)?;
        if file_size == 0 {
            return Err(TransferError::ZeroLengthFile(file_name.into()));
        }

        // A different file under a reused tx_id replaces the old record.
        let stale = self.incoming.get(tx_id).is_some_and(|t| {
            t.sent_metadata
                && (t.file_name != file_name || t.agent_name != agent_name || t.file_size != file_size)
        });
        if stale {
            self.incoming_del(tx_id)?;
        }
        if !self.incoming.contains(tx_id) {
            self.incoming_add(tx_id)?;
        }

        let final_path = self.layout.incoming_path(&agent_name, &file_name);
        let tx = self.incoming.get_mut(tx_id).ok_or(TransferError::NoMatch)?;
        if tx.sent_metadata {
            return Ok(ReceiveOutcome::Handled);
        }
        tx.file_name = file_name;
        tx.agent_name = agent_name;
        tx.file_size = file_size;
        tx.final_path = final_path;
        tx.coverage.clamp(file_size);
        truncate_staging(tx)?;
        tx.sent_metadata = true;
        tx.touch();
        checkpoint::save_now(tx)?;
        tracing::info!(
            peer = %self.node_name,
            tx_id,
            file = %tx.file_name,
            size = tx.file_size,
            "incoming transaction described"
        );

        if tx.is_fully_covered() {
            self.incoming.push_response(tx_id);
            self.incoming_complete(tx_id)?;
            return Ok(ReceiveOutcome::ResponseRequired);
        }
        Ok(ReceiveOutcome::Handled)
    }

    fn apply_request_data(
        &mut self,
        tx_id: TxId,
        hole_start: u64,
        hole_end: u64,
        settings: &TransferSettings,
    ) -> Result<ReceiveOutcome> {
        if hole_end < hole_start {
            tracing::debug!(peer = %self.node_name, tx_id, hole_start, hole_end, "ignoring inverted hole");
            return Ok(ReceiveOutcome::Handled);
        }
        let tx = self.outgoing.get_mut(tx_id).ok_or(TransferError::NoMatch)?;
        if hole_start >= tx.file_size {
            return Err(TransferError::InvalidIndex(hole_start as usize));
        }
        let hole = ChunkRange::new(hole_start, hole_end.min(tx.file_size - 1));
        if tx.coverage.remove_range(hole) {
            tx.sent_all_data = false;
            tx.complete = false;
            checkpoint::save(tx, settings.checkpoint_interval)?;
            tracing::debug!(peer = %self.node_name, tx_id, hole_start, hole_end, "resending hole");
        }
        Ok(ReceiveOutcome::Handled)
    }

    fn apply_data(
        &mut self,
        tx_id: TxId,
        chunk_start: u64,
        bytes: &[u8],
        settings: &TransferSettings,
    ) -> Result<ReceiveOutcome> {
        let end = match bytes.len() as u64 {
            0 => chunk_start,
            len => chunk_start
                .checked_add(len - 1)
                .ok_or(TransferError::InvalidIndex(usize::MAX))?,
        };
        if let Some(tx) = self.incoming.get(tx_id) {
            if tx.sent_metadata && !tx.complete && !bytes.is_empty() && end >= tx.file_size {
                return Err(TransferError::InvalidIndex(end as usize));
            }
        }

        let mut outcome = ReceiveOutcome::Handled;
        if !self.incoming.contains(tx_id) {
            self.incoming_add(tx_id)?;
            outcome = ReceiveOutcome::ResponseRequired;
        }
        if bytes.is_empty() {
            return Ok(outcome);
        }

        let tx = self.incoming.get_mut(tx_id).ok_or(TransferError::NoMatch)?;
        if tx.complete {
            // Already finalized; the peer missed our COMPLETE.
            self.incoming.push_response(tx_id);
            return Ok(ReceiveOutcome::ResponseRequired);
        }
        if !tx.sent_metadata && outcome == ReceiveOutcome::Handled {
            outcome = ReceiveOutcome::ResponseRequired;
        }

        let mut updated = tx.coverage.clone();
        if !updated.add_range(ChunkRange::new(chunk_start, end)) {
            return Ok(outcome);
        }
        write_at(tx, chunk_start, bytes)?;
        tx.coverage = updated;
        tx.touch();

        if tx.sent_metadata && tx.is_fully_covered() {
            checkpoint::save_now(tx)?;
            self.incoming.push_response(tx_id);
            self.incoming_complete(tx_id)?;
            return Ok(ReceiveOutcome::ResponseRequired);
        }
        checkpoint::save(tx, settings.checkpoint_interval)?;
        Ok(outcome)
    }

    // ── Queue mutation ────────────────────────────────────────────────────────

    /// Track a transaction we know nothing about yet. Returns the queue size.
    pub fn incoming_add(&mut self, tx_id: TxId) -> Result<usize> {
        let tx = self.new_transaction(Direction::Incoming, tx_id);
        self.incoming.insert(tx)?;
        tracing::debug!(peer = %self.node_name, tx_id, "incoming transaction opened");
        Ok(self.incoming.len())
    }

    /// Drop an incoming transaction. Partial data is discarded; a file
    /// already finalized stays where it is. Returns the queue size.
    pub fn incoming_del(&mut self, tx_id: TxId) -> Result<usize> {
        let mut tx = self.incoming.remove(tx_id).ok_or(TransferError::NoMatch)?;
        if !tx.complete {
            tx.remove_staging();
            tracing::info!(
                peer = %self.node_name,
                tx_id,
                received = tx.total_bytes(),
                size = tx.file_size,
                "incomplete incoming transaction discarded"
            );
        }
        Ok(self.incoming.recount())
    }

    /// Move the staged file to its final path and drop the checkpoint. The
    /// record stays, marked complete, until the peer cancels it.
    fn incoming_complete(&mut self, tx_id: TxId) -> Result<()> {
        let tx = self.incoming.get_mut(tx_id).ok_or(TransferError::NoMatch)?;
        tx.close();
        if let Some(parent) = tx.final_path.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }
        let staged = tx.staging_file();
        std::fs::rename(&staged, &tx.final_path).io_context(|| {
            format!("failed to rename {} to {}", staged.display(), tx.final_path.display())
        })?;
        remove_if_present(&tx.checkpoint_path());
        tx.complete = true;
        tx.sent_all_data = true;
        tracing::info!(
            peer = %self.node_name,
            tx_id,
            path = %tx.final_path.display(),
            size = tx.file_size,
            "incoming file complete"
        );
        Ok(())
    }

    /// Retry finalization of every record that holds all its bytes but was
    /// never moved into place (a crash before the rename, or an earlier
    /// rename failure). A record that still cannot be finalized ends with
    /// an error: it is marked complete and failed so the peer stops asking,
    /// and its staged bytes are left in temp/file. Returns how many records
    /// were settled either way.
    pub fn finalize_pending(&mut self) -> usize {
        let pending: Vec<TxId> = self
            .incoming
            .iter()
            .filter(|t| t.sent_metadata && !t.complete && t.is_fully_covered())
            .map(|t| t.tx_id)
            .collect();
        for &tx_id in &pending {
            if let Err(e) = self.incoming_complete(tx_id) {
                if let Some(tx) = self.incoming.get_mut(tx_id) {
                    tx.close();
                    remove_if_present(&tx.checkpoint_path());
                    tx.complete = true;
                    tx.sent_all_data = true;
                    tx.failed = true;
                    tracing::error!(
                        peer = %self.node_name,
                        tx_id,
                        staged = %tx.staging_file().display(),
                        error = %e,
                        "incoming file could not be finalized"
                    );
                }
            }
            self.incoming.push_response(tx_id);
        }
        pending.len()
    }

    // ── Responses ─────────────────────────────────────────────────────────────

    /// One response-side pass: REQUEST-DATA for the holes of every
    /// transaction owed a response, COMPLETE for finished ones, and a single
    /// REQUEST-METADATA for every record still lacking metadata (no more
    /// often than the incoming retry interval per record).
    pub fn harvest_responses(&mut self, origin: NodeId, settings: &TransferSettings) -> Vec<Packet> {
        let now = Instant::now();
        let waittime = self.incoming.waittime;
        let mut packets = Vec::new();

        self.finalize_pending();
        for tx_id in self.incoming.take_responses() {
            let Some(tx) = self.incoming.get(tx_id) else {
                continue;
            };
            if !tx.sent_metadata {
                continue;
            }
            if tx.complete {
                packets.push(Packet::Complete { origin, tx_id });
                continue;
            }
            for hole in tx
                .coverage
                .missing_ranges(tx.file_size, settings.max_holes_per_response)
            {
                packets.push(Packet::ReqData {
                    origin,
                    tx_id,
                    hole_start: hole.start,
                    hole_end: hole.end,
                });
            }
        }

        let mut need_meta = Vec::new();
        for tx in self.incoming.iter_mut() {
            if tx.sent_metadata || tx.next_retry.is_some_and(|t| now < t) {
                continue;
            }
            need_meta.push(tx.tx_id);
            tx.next_retry = Some(now + waittime);
        }
        if !need_meta.is_empty() {
            packets.push(Packet::ReqMeta {
                origin,
                peer_name: self.node_name.clone(),
                tx_ids: need_meta,
            });
        }
        packets
    }
}

/// Drop staged bytes past the declared size; DATA that arrived before
/// METADATA is not bounds-checked.
fn truncate_staging(tx: &mut Transaction) -> Result<()> {
    let path = tx.staging_file();
    let len = match std::fs::metadata(&path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len <= tx.file_size {
        return Ok(());
    }
    let size = tx.file_size;
    tx.open_write()
        .and_then(|f| f.set_len(size))
        .io_context(|| format!("failed to truncate {} to {size} bytes", path.display()))
}

fn write_at(tx: &mut Transaction, offset: u64, bytes: &[u8]) -> Result<()> {
    let path = tx.staging_file();
    tx.open_write()
        .and_then(|f| {
            f.seek(SeekFrom::Start(offset))?;
            f.write_all(bytes)
        })
        .io_context(|| format!("failed to write {} bytes at {offset} to {}", bytes.len(), path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::Path;

    const ME: NodeId = 2;
    const SENDER: NodeId = 1;

    fn peer(root: &Path) -> PeerQueues {
        let p = PeerQueues::new(SENDER, "sat", root, &TransferSettings::immediate());
        p.layout.create_all().unwrap();
        p
    }

    fn meta(tx_id: TxId, size: u64) -> Packet {
        Packet::Metadata {
            origin: SENDER,
            tx_id,
            file_name: "img.raw".into(),
            file_size: size,
            agent_name: "camera".into(),
        }
    }

    fn data(tx_id: TxId, start: u64, bytes: &'static [u8]) -> Packet {
        Packet::Data {
            origin: SENDER,
            tx_id,
            chunk_start: start,
            bytes: Bytes::from_static(bytes),
        }
    }

    fn recv(p: &mut PeerQueues, packet: Packet) -> Result<ReceiveOutcome> {
        p.receive(packet, "ground", &TransferSettings::immediate())
    }

    #[test]
    fn assembles_and_finalizes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        recv(&mut p, meta(7, 8)).unwrap();
        assert!(p.incoming.get(7).unwrap().checkpoint_path().exists());

        assert_eq!(recv(&mut p, data(7, 4, b"5678")).unwrap(), ReceiveOutcome::Handled);
        assert_eq!(
            recv(&mut p, data(7, 0, b"1234")).unwrap(),
            ReceiveOutcome::ResponseRequired
        );

        let tx = p.incoming.get(7).unwrap();
        assert!(tx.complete);
        assert!(!tx.checkpoint_path().exists());
        assert!(!tx.staging_file().exists());
        let final_path = p.layout.incoming_path("camera", "img.raw");
        assert_eq!(std::fs::read(&final_path).unwrap(), b"12345678");

        let responses = p.harvest_responses(ME, &TransferSettings::immediate());
        assert_eq!(responses, vec![Packet::Complete { origin: ME, tx_id: 7 }]);

        recv(&mut p, Packet::Cancel { origin: SENDER, tx_id: 7 }).unwrap();
        assert!(p.incoming.is_empty());
        assert!(final_path.exists());
    }

    #[test]
    fn data_before_metadata_requests_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        assert_eq!(
            recv(&mut p, data(3, 0, b"abcd")).unwrap(),
            ReceiveOutcome::ResponseRequired
        );
        let out = p.harvest_responses(ME, &TransferSettings::immediate());
        assert_eq!(
            out,
            vec![Packet::ReqMeta { origin: ME, peer_name: "sat".into(), tx_ids: vec![3] }]
        );

        // all bytes already present: metadata finalizes immediately
        assert_eq!(recv(&mut p, meta(3, 4)).unwrap(), ReceiveOutcome::ResponseRequired);
        assert!(p.incoming.get(3).unwrap().complete);
        assert_eq!(
            std::fs::read(p.layout.incoming_path("camera", "img.raw")).unwrap(),
            b"abcd"
        );
    }

    #[test]
    fn early_data_past_declared_size_is_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        recv(&mut p, data(3, 0, b"abcdefgh")).unwrap();
        assert_eq!(recv(&mut p, meta(3, 4)).unwrap(), ReceiveOutcome::ResponseRequired);

        let tx = p.incoming.get(3).unwrap();
        assert!(tx.complete);
        assert_eq!(tx.total_bytes(), 4);
        assert_eq!(
            std::fs::read(p.layout.incoming_path("camera", "img.raw")).unwrap(),
            b"abcd"
        );
    }

    #[test]
    fn overflowing_data_creates_no_record() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        assert!(matches!(
            recv(&mut p, data(8, u64::MAX, b"xy")),
            Err(TransferError::InvalidIndex(_))
        ));
        assert!(p.incoming.is_empty());
    }

    #[test]
    fn unfinalizable_file_ends_with_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        // a regular file where the agent directory should go
        let agent_dir = p.layout.incoming_path("camera", "img.raw");
        let agent_dir = agent_dir.parent().unwrap();
        std::fs::create_dir_all(agent_dir.parent().unwrap()).unwrap();
        std::fs::write(agent_dir, b"in the way").unwrap();

        recv(&mut p, meta(7, 4)).unwrap();
        assert!(recv(&mut p, data(7, 0, b"1234")).is_err());
        assert!(!p.incoming.get(7).unwrap().complete);

        let responses = p.harvest_responses(ME, &TransferSettings::immediate());
        assert_eq!(responses, vec![Packet::Complete { origin: ME, tx_id: 7 }]);
        let tx = p.incoming.get(7).unwrap();
        assert!(tx.complete);
        assert!(tx.failed);
        assert!(!tx.checkpoint_path().exists());
        assert_eq!(std::fs::read(tx.staging_file()).unwrap(), b"1234");

        // the peer's CANCEL leaves the staged copy alone
        let staged = tx.staging_file();
        recv(&mut p, Packet::Cancel { origin: SENDER, tx_id: 7 }).unwrap();
        assert!(p.incoming.is_empty());
        assert!(staged.exists());
    }

    #[test]
    fn request_complete_yields_holes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        recv(&mut p, meta(9, 12)).unwrap();
        recv(&mut p, data(9, 4, b"efgh")).unwrap();
        assert_eq!(
            recv(&mut p, Packet::ReqComplete { origin: SENDER, tx_id: 9 }).unwrap(),
            ReceiveOutcome::ResponseRequired
        );
        let out = p.harvest_responses(ME, &TransferSettings::immediate());
        assert_eq!(
            out,
            vec![
                Packet::ReqData { origin: ME, tx_id: 9, hole_start: 0, hole_end: 3 },
                Packet::ReqData { origin: ME, tx_id: 9, hole_start: 8, hole_end: 11 },
            ]
        );
        assert!(p.harvest_responses(ME, &TransferSettings::immediate()).is_empty());
    }

    #[test]
    fn duplicate_queue_changes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        let queue = Packet::Queue {
            origin: SENDER,
            peer_name: "ground".into(),
            bitmap: QueueBitmap::from_ids([5, 6]),
        };
        assert_eq!(recv(&mut p, queue.clone()).unwrap(), ReceiveOutcome::ResponseRequired);
        assert_eq!(p.incoming.tx_ids(), vec![5, 6]);
        assert_eq!(recv(&mut p, queue).unwrap(), ReceiveOutcome::Handled);
        assert_eq!(p.incoming.tx_ids(), vec![5, 6]);
    }

    #[test]
    fn cleared_queue_bit_discards_partial_data() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        recv(&mut p, meta(5, 8)).unwrap();
        recv(&mut p, data(5, 0, b"1234")).unwrap();
        let staged = p.incoming.get(5).unwrap().staging_file();
        assert!(staged.exists());

        recv(
            &mut p,
            Packet::Queue { origin: SENDER, peer_name: "ground".into(), bitmap: QueueBitmap::new() },
        )
        .unwrap();
        assert!(p.incoming.is_empty());
        assert!(!staged.exists());
        assert!(!p.layout.incoming_path("camera", "img.raw").exists());
    }

    #[test]
    fn queue_for_another_node_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        recv(
            &mut p,
            Packet::Queue {
                origin: SENDER,
                peer_name: "elsewhere".into(),
                bitmap: QueueBitmap::from_ids([1]),
            },
        )
        .unwrap();
        assert!(p.incoming.is_empty());
    }

    #[test]
    fn invalid_packets_leave_no_trace() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        let bad = Packet::Metadata {
            origin: SENDER,
            tx_id: 4,
            file_name: "../../etc/shadow".into(),
            file_size: 10,
            agent_name: "x".into(),
        };
        assert!(matches!(recv(&mut p, bad), Err(TransferError::InvalidFilename(_))));
        assert!(matches!(
            recv(&mut p, meta(0, 10)),
            Err(TransferError::InvalidIndex(0))
        ));
        assert!(p.incoming.is_empty());

        recv(&mut p, meta(4, 4)).unwrap();
        assert!(matches!(
            recv(&mut p, data(4, 2, b"xyz")),
            Err(TransferError::InvalidIndex(4))
        ));
        assert_eq!(p.incoming.get(4).unwrap().total_bytes(), 0);

        assert!(matches!(
            recv(&mut p, Packet::Complete { origin: SENDER, tx_id: 99 }),
            Err(TransferError::NoMatch)
        ));
    }

    #[test]
    fn request_metadata_marks_outgoing_for_resend() {
        let tmp = tempfile::tempdir().unwrap();
        let mut p = peer(tmp.path());
        let mut tx = p.new_transaction(Direction::Outgoing, 11);
        tx.sent_metadata = true;
        p.outgoing.insert(tx).unwrap();
        p.outgoing.announce = false;

        recv(
            &mut p,
            Packet::ReqMeta { origin: SENDER, peer_name: "ground".into(), tx_ids: vec![11, 12] },
        )
        .unwrap();
        assert!(!p.outgoing.get(11).unwrap().sent_metadata);
        assert!(p.outgoing.announce);
    }
}
