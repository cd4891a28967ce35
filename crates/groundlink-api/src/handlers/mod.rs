//! HTTP API handlers — exposes the transfer engine's query surface as JSON.

pub mod status;
pub mod transfers;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use tokio::sync::Mutex;

use groundlink_services::{TransferEngine, TransferError};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Mutex<TransferEngine>>,
    /// Name this node goes by in the node directory.
    pub node_name: String,
    pub started_at: Instant,
    /// Sending on this stops every daemon loop.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Map an engine error onto a status code and its display text.
fn reject(e: TransferError) -> (StatusCode, String) {
    let status = match e {
        TransferError::UnknownPeer(_) | TransferError::UnknownPeerId(_) | TransferError::NoMatch => {
            StatusCode::NOT_FOUND
        }
        TransferError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use status::{handle_shutdown, handle_status};
pub use transfers::{
    handle_enable, handle_incoming, handle_load, handle_outgoing, handle_packet_size,
    handle_waittime,
};
