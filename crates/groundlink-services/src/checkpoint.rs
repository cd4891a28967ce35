//! Checkpoint store: the on-disk snapshot that lets a transfer resume.
//!
//! File layout (all integers little-endian):
//!   CheckpointHeader (217 bytes) + CRC-16
//!   CheckpointRange  (16 bytes)  + CRC-16, repeated until EOF
//!
//! The CRC is CRC-16/IBM-3740 (CCITT-FALSE) over the preceding record.
//! Writes go to `<base>.meta.tmp` and are renamed over `<base>.meta`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crc::{Crc, CRC_16_IBM_3740};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use groundlink_core::wire::{TxId, MAX_AGENT_NAME_LEN, MAX_FILE_NAME_LEN, MAX_NODE_NAME_LEN};

use crate::coverage::{ChunkRange, Coverage};
use crate::error::{IoContext, Result, TransferError};
use crate::transaction::Transaction;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC_LEN: usize = 2;

// ── On-disk records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct CheckpointHeader {
    tx_id: u8,
    file_size: u64,
    /// Zero-padded.
    file_name: [u8; MAX_FILE_NAME_LEN],
    node_name: [u8; MAX_NODE_NAME_LEN],
    agent_name: [u8; MAX_AGENT_NAME_LEN],
}

assert_eq_size!(CheckpointHeader, [u8; 217]);

#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct CheckpointRange {
    start: u64,
    end: u64,
}

assert_eq_size!(CheckpointRange, [u8; 16]);

const HEADER_RECORD: usize = std::mem::size_of::<CheckpointHeader>() + CRC_LEN;
const RANGE_RECORD: usize = std::mem::size_of::<CheckpointRange>() + CRC_LEN;

/// What a checkpoint file carries. The engine rebuilds paths from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub tx_id: TxId,
    pub file_size: u64,
    pub file_name: String,
    pub node_name: String,
    pub agent_name: String,
    pub coverage: Coverage,
}

// ── Save ──────────────────────────────────────────────────────────────────────

/// Write `tx`'s checkpoint unless one was written less than `min_interval`
/// ago. Returns whether a write happened.
pub fn save(tx: &mut Transaction, min_interval: Duration) -> Result<bool> {
    let now = Instant::now();
    if let Some(last) = tx.last_checkpoint {
        if now.duration_since(last) < min_interval {
            return Ok(false);
        }
    }
    write(tx)?;
    tx.last_checkpoint = Some(now);
    Ok(true)
}

/// Write unconditionally.
pub fn save_now(tx: &mut Transaction) -> Result<()> {
    write(tx)?;
    tx.last_checkpoint = Some(Instant::now());
    Ok(())
}

fn write(tx: &Transaction) -> Result<()> {
    let bytes = encode(
        tx.tx_id,
        tx.file_size,
        &tx.file_name,
        &tx.peer_name,
        &tx.agent_name,
        &tx.coverage,
    );
    let path = tx.checkpoint_path();
    let tmp_path = temp_path(&path);
    {
        let mut file = fs::File::create(&tmp_path)
            .io_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(&bytes)
            .io_context(|| format!("failed to write {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, &path).io_context(|| {
        format!("failed to rename {} to {}", tmp_path.display(), path.display())
    })?;

    tracing::trace!(
        tx_id = tx.tx_id,
        ranges = tx.coverage.ranges().len(),
        path = %path.display(),
        "checkpoint written"
    );
    Ok(())
}

fn encode(
    tx_id: TxId,
    file_size: u64,
    file_name: &str,
    node_name: &str,
    agent_name: &str,
    coverage: &Coverage,
) -> Vec<u8> {
    let mut header = CheckpointHeader::new_zeroed();
    header.tx_id = tx_id;
    header.file_size = file_size.to_le();
    copy_name(&mut header.file_name, file_name);
    copy_name(&mut header.node_name, node_name);
    copy_name(&mut header.agent_name, agent_name);

    let mut out = Vec::with_capacity(HEADER_RECORD + coverage.ranges().len() * RANGE_RECORD);
    push_with_crc(&mut out, header.as_bytes());
    for r in coverage.ranges() {
        let entry = CheckpointRange {
            start: r.start.to_le(),
            end: r.end.to_le(),
        };
        push_with_crc(&mut out, entry.as_bytes());
    }
    out
}

fn push_with_crc(out: &mut Vec<u8>, record: &[u8]) {
    out.extend_from_slice(record);
    out.extend_from_slice(&CRC16.checksum(record).to_le_bytes());
}

fn copy_name(dst: &mut [u8], name: &str) {
    let n = name.len().min(dst.len());
    dst[..n].copy_from_slice(&name.as_bytes()[..n]);
}

// ── Restore ───────────────────────────────────────────────────────────────────

pub fn restore(path: &Path) -> Result<CheckpointRecord> {
    let bytes = fs::read(path).io_context(|| format!("failed to read {}", path.display()))?;
    decode(path, &bytes)
}

fn decode(path: &Path, bytes: &[u8]) -> Result<CheckpointRecord> {
    if bytes.len() < HEADER_RECORD {
        return Err(TransferError::SizeMismatch {
            path: path.to_path_buf(),
            trailing: bytes.len(),
        });
    }
    let (head, mut rest) = bytes.split_at(HEADER_RECORD);
    let header = checked::<CheckpointHeader>(path, head)?;

    let mut coverage = Coverage::new();
    while !rest.is_empty() {
        if rest.len() < RANGE_RECORD {
            return Err(TransferError::SizeMismatch {
                path: path.to_path_buf(),
                trailing: rest.len(),
            });
        }
        let (entry, tail) = rest.split_at(RANGE_RECORD);
        let range = checked::<CheckpointRange>(path, entry)?;
        coverage.add_range(ChunkRange::new(u64::from_le(range.start), u64::from_le(range.end)));
        rest = tail;
    }

    let file_size = u64::from_le(header.file_size);
    coverage.clamp(file_size);

    Ok(CheckpointRecord {
        tx_id: header.tx_id,
        file_size,
        file_name: read_name(&header.file_name),
        node_name: read_name(&header.node_name),
        agent_name: read_name(&header.agent_name),
        coverage,
    })
}

/// Verify the trailing CRC of `record` and read the struct in front of it.
fn checked<T: FromBytes>(path: &Path, record: &[u8]) -> Result<T> {
    let (body, crc) = record.split_at(record.len() - CRC_LEN);
    let stored = u16::from_le_bytes([crc[0], crc[1]]);
    if CRC16.checksum(body) != stored {
        return Err(TransferError::Checksum(path.to_path_buf()));
    }
    T::read_from(body).ok_or_else(|| TransferError::SizeMismatch {
        path: path.to_path_buf(),
        trailing: body.len(),
    })
}

fn read_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Path of the temporary file a save goes through.
pub fn temp_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("meta.tmp")
}
