//! groundlink-services — the transfer engine.
//!
//! Per-peer transaction queues, chunk-range reconciliation, the outgoing
//! and incoming state machines, checkpointing, and the response
//! reassembler. No networking lives here; the daemon feeds packets in and
//! carries harvested packets out.

pub mod checkpoint;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod incoming;
pub mod layout;
pub mod outgoing;
pub mod peer;
pub mod queue;
pub mod reassembly;
pub mod transaction;

pub use coverage::{ChunkRange, Coverage};
pub use engine::{IncomingInfo, OutgoingInfo, TransferEngine, TransferSettings, WaitDirection};
pub use error::TransferError;
pub use incoming::ReceiveOutcome;
pub use peer::PeerQueues;
pub use reassembly::{ResponseCallback, ResponseReassembler};
