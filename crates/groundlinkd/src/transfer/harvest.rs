//! Harvest loop — periodically collects packets from the engine and puts
//! them on the link.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use groundlink_core::config::TransferConfig;
use groundlink_core::{NodeId, Packet};

use super::SharedEngine;
use crate::link::Link;

#[derive(Debug, Clone, Copy)]
pub struct HarvestTiming {
    pub interval: Duration,
    pub scan_every: Duration,
}

impl From<&TransferConfig> for HarvestTiming {
    fn from(c: &TransferConfig) -> Self {
        Self {
            interval: Duration::from_millis(c.harvest_interval_ms.max(1)),
            scan_every: Duration::from_secs(c.scan_interval_secs.max(1)),
        }
    }
}

pub async fn harvest_loop(
    engine: SharedEngine,
    link: Link,
    timing: HarvestTiming,
    wake: Arc<Notify>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(timing.interval);
    let mut scan = tokio::time::interval(timing.scan_every);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("harvest loop shutting down");
                return;
            }
            _ = scan.tick() => {
                let queued = engine.lock().await.load_all();
                tracing::debug!(queued, "outgoing directories scanned");
            }
            _ = interval.tick() => {
                harvest_once(&engine, &link).await;
            }
            // a receive asked for a prompt response pass
            _ = wake.notified() => {
                harvest_once(&engine, &link).await;
            }
        }
    }
}

/// One request + response pass over every peer whose address is known.
/// Peers the link cannot reach yet are left untouched so their queues do
/// not advance into the void. Returns the number of packets sent.
pub async fn harvest_once(engine: &SharedEngine, link: &Link) -> usize {
    let packets = collect(engine, link).await;

    let mut sent = 0;
    for (node_id, packet) in packets {
        match link.send(node_id, &packet).await {
            Ok(true) => sent += 1,
            Ok(false) => tracing::trace!(node_id, "peer address unknown, packet dropped"),
            Err(e) => tracing::warn!(node_id, error = %e, "failed to send packet"),
        }
    }
    if sent > 0 {
        tracing::trace!(sent, "harvest pass complete");
    }
    sent
}

async fn collect(engine: &SharedEngine, link: &Link) -> Vec<(NodeId, Packet)> {
    let mut engine = engine.lock().await;
    let mut out = Vec::new();
    for (node_id, name) in engine.peers() {
        if link.address(node_id).is_none() {
            continue;
        }
        let passes = engine
            .harvest_packets(&name)
            .and_then(|mut p| {
                p.extend(engine.harvest_responses(&name)?);
                Ok(p)
            });
        match passes {
            Ok(packets) => out.extend(packets.into_iter().map(|p| (node_id, p))),
            Err(e) => tracing::warn!(peer = %name, error = %e, "harvest failed"),
        }
    }
    out
}
