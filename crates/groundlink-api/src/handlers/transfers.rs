//! /outgoing, /incoming, /load, /enable, /waittime, /packet-size handlers.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use groundlink_services::{IncomingInfo, OutgoingInfo, WaitDirection};

use super::{reject, ApiState};

// ── /outgoing, /incoming ─────────────────────────────────────────────────────

pub async fn handle_outgoing(State(state): State<ApiState>) -> Json<Vec<OutgoingInfo>> {
    Json(state.engine.lock().await.list_outgoing())
}

pub async fn handle_incoming(State(state): State<ApiState>) -> Json<Vec<IncomingInfo>> {
    Json(state.engine.lock().await.list_incoming())
}

// ── /load ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct LoadResponse {
    /// Outgoing transactions queued across all peers after the rescan.
    pub queued: usize,
}

pub async fn handle_load(State(state): State<ApiState>) -> Json<LoadResponse> {
    let queued = state.engine.lock().await.load_all();
    tracing::info!(queued, "outgoing directories rescanned via API");
    Json(LoadResponse { queued })
}

// ── /enable ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EnableRequest {
    pub peer: String,
    /// When present, only this file stays enabled.
    pub file: Option<String>,
}

#[derive(Serialize)]
pub struct EnableResponse {
    pub enabled: usize,
}

pub async fn handle_enable(
    State(state): State<ApiState>,
    Json(req): Json<EnableRequest>,
) -> Result<Json<EnableResponse>, (StatusCode, String)> {
    let mut engine = state.engine.lock().await;
    let enabled = match &req.file {
        Some(file) => engine.enable_single(&req.peer, file),
        None => engine.enable_all(&req.peer),
    }
    .map_err(reject)?;
    Ok(Json(EnableResponse { enabled }))
}

// ── /waittime ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct WaittimeRequest {
    pub peer: String,
    pub direction: WaitDirection,
    pub seconds: u64,
}

#[derive(Serialize)]
pub struct WaittimeResponse {
    pub peer: String,
    pub direction: WaitDirection,
    pub seconds: u64,
}

pub async fn handle_waittime(
    State(state): State<ApiState>,
    Json(req): Json<WaittimeRequest>,
) -> Result<Json<WaittimeResponse>, (StatusCode, String)> {
    state
        .engine
        .lock()
        .await
        .set_waittime(&req.peer, req.direction, Duration::from_secs(req.seconds))
        .map_err(reject)?;
    tracing::info!(peer = %req.peer, direction = ?req.direction, seconds = req.seconds, "waittime set");
    Ok(Json(WaittimeResponse {
        peer: req.peer,
        direction: req.direction,
        seconds: req.seconds,
    }))
}

// ── /packet-size ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PacketSizeRequest {
    pub size: usize,
}

#[derive(Serialize)]
pub struct PacketSizeResponse {
    /// Size in effect after clamping.
    pub packet_size: usize,
}

pub async fn handle_packet_size(
    State(state): State<ApiState>,
    Json(req): Json<PacketSizeRequest>,
) -> Json<PacketSizeResponse> {
    let packet_size = state.engine.lock().await.set_packet_size(req.size);
    tracing::info!(requested = req.size, packet_size, "packet size set");
    Json(PacketSizeResponse { packet_size })
}
