//! groundlink-core — wire format, configuration, and the node directory.
//! All other groundlink crates depend on this one.

pub mod config;
pub mod node;
pub mod wire;

pub use node::NodeDirectory;
pub use wire::{NodeId, Packet, PacketKind, QueueBitmap, TxId, WireError};
