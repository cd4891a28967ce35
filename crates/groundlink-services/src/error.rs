//! Transfer engine errors. Every variant is local and recoverable.

use groundlink_core::{NodeId, TxId, WireError};
use std::path::PathBuf;

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("unknown peer id: {0}")]
    UnknownPeerId(NodeId),

    #[error("invalid file name or path: {0}")]
    InvalidFilename(String),

    #[error("transfer queue full")]
    QueueFull,

    #[error("tx_id {0} already in use")]
    Duplicate(TxId),

    #[error("{path} changed size: queued {queued}, found {found}")]
    FileSizeMismatch {
        path: PathBuf,
        queued: u64,
        found: u64,
    },

    #[error("zero-length file: {0}")]
    ZeroLengthFile(PathBuf),

    #[error("no matching transaction")]
    NoMatch,

    #[error("invalid index: {0}")]
    InvalidIndex(usize),

    #[error("checksum mismatch in {0}")]
    Checksum(PathBuf),

    #[error("{path}: {trailing} trailing bytes do not form a whole record")]
    SizeMismatch { path: PathBuf, trailing: usize },

    #[error("no reassembly slots available")]
    NoSlots,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TransferError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }

    /// Native OS error code for I/O failures.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransferError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Attach a context string to an `io::Result`, in the spirit of `anyhow::Context`.
pub(crate) trait IoContext<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| TransferError::io(f(), e))
    }
}
