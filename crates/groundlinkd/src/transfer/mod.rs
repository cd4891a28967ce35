//! Transfer loops — drive the engine from the link.
//!
//! The engine is the single owner of all queue state. Both loops take the
//! lock only for the engine call itself and never across a socket await.

pub mod harvest;
pub mod receive;

use std::sync::Arc;

use tokio::sync::Mutex;

use groundlink_services::TransferEngine;

pub type SharedEngine = Arc<Mutex<TransferEngine>>;
