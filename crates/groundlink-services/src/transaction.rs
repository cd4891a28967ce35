//! Transaction record: one file transfer attempt in one direction.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use groundlink_core::TxId;

use crate::coverage::Coverage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    /// File-name prefix of this direction's staging files.
    pub fn prefix(self) -> &'static str {
        match self {
            Direction::Incoming => "in_",
            Direction::Outgoing => "out_",
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    pub tx_id: TxId,
    pub direction: Direction,
    pub peer_name: String,
    pub agent_name: String,
    pub file_name: String,
    /// Outgoing: the source file. Incoming: where the finished file lands.
    /// Empty until an incoming record learns its metadata.
    pub final_path: PathBuf,
    /// `temp/file/{in_,out_}<tx>`, without extension.
    pub staging_base: PathBuf,
    /// 0 until known.
    pub file_size: u64,
    /// Outgoing: bytes already sent. Incoming: bytes already received.
    pub coverage: Coverage,
    /// Outgoing: METADATA sent. Incoming: METADATA received.
    pub sent_metadata: bool,
    pub sent_all_data: bool,
    pub complete: bool,
    /// Incoming only: all bytes arrived but the file could not be moved
    /// into place. The staged copy stays in temp/file.
    pub failed: bool,
    pub enabled: bool,
    handle: Option<File>,
    pub last_checkpoint: Option<Instant>,
    pub last_activity: Instant,
    pub next_retry: Option<Instant>,
}

impl Transaction {
    pub fn new(tx_id: TxId, direction: Direction, peer_name: &str, staging_base: PathBuf) -> Self {
        Self {
            tx_id,
            direction,
            peer_name: peer_name.to_string(),
            agent_name: String::new(),
            file_name: String::new(),
            final_path: PathBuf::new(),
            staging_base,
            file_size: 0,
            coverage: Coverage::new(),
            sent_metadata: false,
            sent_all_data: false,
            complete: false,
            failed: false,
            enabled: true,
            handle: None,
            last_checkpoint: None,
            last_activity: Instant::now(),
            next_retry: None,
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.staging_base.with_extension("meta")
    }

    /// Incoming bytes are assembled here before the final rename.
    pub fn staging_file(&self) -> PathBuf {
        self.staging_base.with_extension("file")
    }

    pub fn total_bytes(&self) -> u64 {
        self.coverage.total_bytes()
    }

    pub fn is_fully_covered(&self) -> bool {
        self.coverage.is_complete(self.file_size)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the source file for reading, or return the handle already held.
    pub fn open_read(&mut self) -> io::Result<&mut File> {
        if self.handle.is_none() {
            self.handle = Some(File::open(&self.final_path)?);
        }
        self.handle_mut()
    }

    /// Open the staging file for positioned writes, creating it if absent.
    pub fn open_write(&mut self) -> io::Result<&mut File> {
        if self.handle.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.staging_file())?;
            self.handle = Some(file);
        }
        self.handle_mut()
    }

    fn handle_mut(&mut self) -> io::Result<&mut File> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "handle not open"))
    }

    /// Release the file handle. Safe to call when nothing is open.
    pub fn close(&mut self) {
        self.handle = None;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Remove checkpoint and staging data. Missing files are fine.
    pub fn remove_staging(&mut self) {
        self.close();
        remove_if_present(&self.checkpoint_path());
        if self.direction == Direction::Incoming {
            remove_if_present(&self.staging_file());
        }
    }
}

pub(crate) fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}
