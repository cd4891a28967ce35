//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub node: String,
    pub node_id: u8,
    pub uptime_secs: u64,
    pub packet_size: usize,
    pub peers: Vec<PeerStatus>,
}

#[derive(Serialize)]
pub struct PeerStatus {
    pub name: String,
    pub node_id: u8,
    pub outgoing: usize,
    pub incoming: usize,
    pub outgoing_waittime_secs: u64,
    pub incoming_waittime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let engine = state.engine.lock().await;

    let peers = engine
        .peers()
        .into_iter()
        .filter_map(|(id, name)| {
            let peer = engine.peer(&name).ok()?;
            Some(PeerStatus {
                node_id: id,
                outgoing: peer.outgoing.len(),
                incoming: peer.incoming.len(),
                outgoing_waittime_secs: peer.outgoing.waittime.as_secs(),
                incoming_waittime_secs: peer.incoming.waittime.as_secs(),
                name,
            })
        })
        .collect();

    Json(StatusResponse {
        node: state.node_name.clone(),
        node_id: engine.self_id(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        packet_size: engine.packet_size(),
        peers,
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub shutting_down: bool,
}

/// Broadcast shutdown to every daemon loop. The response goes out before
/// the API server itself drains.
pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let shutting_down = state.shutdown_tx.send(()).is_ok();
    Json(ShutdownResponse { shutting_down })
}
