//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    node: String,
    node_id: u8,
    uptime_secs: u64,
    packet_size: usize,
    peers: Vec<PeerStatus>,
}

#[derive(Deserialize)]
struct PeerStatus {
    name: String,
    node_id: u8,
    outgoing: usize,
    incoming: usize,
    outgoing_waittime_secs: u64,
    incoming_waittime_secs: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    shutting_down: bool,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Groundlink Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Node           : {} (id {})", resp.node, resp.node_id);
    println!("  Uptime         : {}s", resp.uptime_secs);
    println!("  Packet size    : {} bytes", resp.packet_size);

    if resp.peers.is_empty() {
        println!("\n  No peers configured.");
    } else {
        println!("\n  Peers:");
        for p in &resp.peers {
            println!("  ┌─ {} (id {})", p.name, p.node_id);
            println!("  │  outgoing : {} (retry {}s)", p.outgoing, p.outgoing_waittime_secs);
            println!("  └─ incoming : {} (retry {}s)", p.incoming, p.incoming_waittime_secs);
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    if resp.shutting_down {
        println!("groundlinkd is shutting down.");
    } else {
        println!("groundlinkd did not acknowledge the shutdown.");
    }
    Ok(())
}
