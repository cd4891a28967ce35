//! Queue listing and control commands.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json, post_json_body};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OutgoingRow {
    tx_id: u8,
    file_name: String,
    agent_name: String,
    file_size: u64,
    node_name: String,
    enabled: bool,
    bytes_sent: u64,
    complete: bool,
    #[serde(default)]
    failed: bool,
}

#[derive(Deserialize)]
struct IncomingRow {
    tx_id: u8,
    file_name: String,
    agent_name: String,
    file_size: u64,
    node_name: String,
    total_bytes: u64,
    metadata_received: bool,
    complete: bool,
    #[serde(default)]
    failed: bool,
}

#[derive(Deserialize)]
struct LoadResponse {
    queued: usize,
}

#[derive(Deserialize)]
struct EnableResponse {
    enabled: usize,
}

#[derive(Deserialize)]
struct WaittimeResponse {
    peer: String,
    direction: String,
    seconds: u64,
}

#[derive(Deserialize)]
struct PacketSizeResponse {
    packet_size: usize,
}

// ── Request bodies ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EnableRequest<'a> {
    peer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
}

#[derive(Serialize)]
struct WaittimeRequest<'a> {
    peer: &'a str,
    direction: &'static str,
    seconds: u64,
}

#[derive(Serialize)]
struct PacketSizeRequest {
    size: usize,
}

/// Map the short CLI spelling onto the API's direction names.
pub fn parse_direction(s: &str) -> Result<&'static str> {
    match s {
        "in" | "incoming" => Ok("incoming"),
        "out" | "outgoing" => Ok("outgoing"),
        "both" => Ok("both"),
        other => bail!("direction must be in, out or both (got {:?})", other),
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 { 0 } else { done.min(total) * 100 / total }
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_outgoing(port: u16) -> Result<()> {
    let rows: Vec<OutgoingRow> = get_json(&format!("{}/outgoing", base_url(port))).await?;
    if rows.is_empty() {
        println!("No outgoing transfers.");
        return Ok(());
    }

    println!("{:<4} {:<10} {:<12} {:<28} {:>10} {:>5}  STATE", "TX", "PEER", "AGENT", "FILE", "SIZE", "SENT");
    for r in &rows {
        let state = if r.failed {
            "failed"
        } else if r.complete {
            "complete"
        } else if !r.enabled {
            "disabled"
        } else {
            "sending"
        };
        println!(
            "{:<4} {:<10} {:<12} {:<28} {:>10} {:>4}%  {}",
            r.tx_id,
            r.node_name,
            r.agent_name,
            r.file_name,
            r.file_size,
            percent(r.bytes_sent, r.file_size),
            state
        );
    }
    Ok(())
}

pub async fn cmd_incoming(port: u16) -> Result<()> {
    let rows: Vec<IncomingRow> = get_json(&format!("{}/incoming", base_url(port))).await?;
    if rows.is_empty() {
        println!("No incoming transfers.");
        return Ok(());
    }

    println!("{:<4} {:<10} {:<12} {:<28} {:>10} {:>5}  STATE", "TX", "PEER", "AGENT", "FILE", "SIZE", "RECV");
    for r in &rows {
        let state = if r.failed {
            "failed"
        } else if r.complete {
            "complete"
        } else if !r.metadata_received {
            "awaiting metadata"
        } else {
            "receiving"
        };
        let file = if r.file_name.is_empty() { "?" } else { r.file_name.as_str() };
        println!(
            "{:<4} {:<10} {:<12} {:<28} {:>10} {:>4}%  {}",
            r.tx_id,
            r.node_name,
            r.agent_name,
            file,
            r.file_size,
            percent(r.total_bytes, r.file_size),
            state
        );
    }
    Ok(())
}

pub async fn cmd_load(port: u16) -> Result<()> {
    let resp: LoadResponse = post_json(&format!("{}/load", base_url(port))).await?;
    println!("Outgoing directories rescanned, {} transfer(s) queued.", resp.queued);
    Ok(())
}

pub async fn cmd_enable(port: u16, peer: &str, file: Option<&str>) -> Result<()> {
    let body = EnableRequest { peer, file };
    let resp: EnableResponse =
        post_json_body(&format!("{}/enable", base_url(port)), &body).await?;
    match file {
        Some(f) => println!("Only {} enabled for {} ({} transfer(s)).", f, peer, resp.enabled),
        None => println!("All {} transfer(s) enabled for {}.", resp.enabled, peer),
    }
    Ok(())
}

pub async fn cmd_waittime(port: u16, peer: &str, direction: &str, seconds: &str) -> Result<()> {
    let direction = parse_direction(direction)?;
    let seconds: u64 = match seconds.parse() {
        Ok(s) => s,
        Err(_) => bail!("seconds must be a non-negative integer (got {:?})", seconds),
    };
    let body = WaittimeRequest { peer, direction, seconds };
    let resp: WaittimeResponse =
        post_json_body(&format!("{}/waittime", base_url(port)), &body).await?;
    println!("{} {} waittime set to {}s.", resp.peer, resp.direction, resp.seconds);
    Ok(())
}

pub async fn cmd_packet_size(port: u16, size: &str) -> Result<()> {
    let size: usize = match size.parse() {
        Ok(s) => s,
        Err(_) => bail!("packet size must be a positive integer (got {:?})", size),
    };
    let resp: PacketSizeResponse =
        post_json_body(&format!("{}/packet-size", base_url(port)), &PacketSizeRequest { size })
            .await?;
    if resp.packet_size != size {
        println!("Packet size clamped to {} bytes.", resp.packet_size);
    } else {
        println!("Packet size set to {} bytes.", resp.packet_size);
    }
    Ok(())
}
