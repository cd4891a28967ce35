//! Receive loop — decodes datagrams from the link and applies them.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

use groundlink_core::Packet;
use groundlink_services::ReceiveOutcome;

use super::SharedEngine;
use crate::link::{Link, MAX_DATAGRAM};

pub async fn receive_loop(
    engine: SharedEngine,
    link: Link,
    wake: Arc<Notify>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("receive loop shutting down");
                return;
            }
            r = link.recv(&mut buf) => r,
        };
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "link receive failed");
                continue;
            }
        };

        if handle_datagram(&engine, &link, &buf[..len], from).await
            == Some(ReceiveOutcome::ResponseRequired)
        {
            wake.notify_one();
        }
    }
}

/// Decode and apply one datagram. Undecodable payloads are dropped. The
/// sender's address is learned only once the engine has accepted the
/// packet from a known node.
pub async fn handle_datagram(
    engine: &SharedEngine,
    link: &Link,
    payload: &[u8],
    from: SocketAddr,
) -> Option<ReceiveOutcome> {
    let packet = match Packet::decode(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(%from, len = payload.len(), error = %e, "undecodable datagram, discarding");
            return None;
        }
    };
    let origin = packet.origin();
    tracing::trace!(%from, origin, kind = packet.kind().name(), "packet received");

    // rejections are logged by the engine
    let outcome = engine.lock().await.receive(packet).ok()?;
    link.learn(origin, from);
    Some(outcome)
}
