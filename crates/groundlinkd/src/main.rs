//! groundlinkd — store-and-forward file transfer daemon.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Notify};

use groundlink_core::config::GroundlinkConfig;
use groundlink_core::NodeDirectory;
use groundlink_services::{TransferEngine, TransferSettings};

mod link;
mod transfer;

use link::Link;
use transfer::harvest::{self, HarvestTiming};
use transfer::receive;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GroundlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GroundlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GroundlinkConfig::default()
    });
    tracing::info!(
        node = %config.node.name,
        data_root = %config.node.data_root.display(),
        "groundlinkd starting"
    );

    // Node directory + engine
    let directory = NodeDirectory::from_entries(&config.nodes);
    if directory.len() < config.nodes.len() {
        tracing::warn!(
            configured = config.nodes.len(),
            accepted = directory.len(),
            "some [[nodes]] entries were rejected"
        );
    }
    let settings = TransferSettings::from(&config.transfer);
    let mut engine = TransferEngine::new(
        &config.node.name,
        &directory,
        config.node.data_root.clone(),
        settings,
    )
    .with_context(|| {
        format!(
            "failed to start transfer engine for node {:?} (is it listed under [[nodes]]?)",
            config.node.name
        )
    })?;
    let queued = engine.load_all();
    tracing::info!(
        node_id = engine.self_id(),
        peers = engine.peers().len(),
        queued,
        "transfer engine ready"
    );

    let engine = Arc::new(Mutex::new(engine));

    // Link
    let link = Link::bind(&config.link.bind_addr).await?;
    link.add_static_peers(&config.link.peers, &directory);
    tracing::info!(addr = %link.local_addr()?, "link bound");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let wake = Arc::new(Notify::new());

    let harvest_task = tokio::spawn(harvest::harvest_loop(
        engine.clone(),
        link.clone(),
        HarvestTiming::from(&config.transfer),
        wake.clone(),
        shutdown_tx.subscribe(),
    ));

    let receive_task = tokio::spawn(receive::receive_loop(
        engine.clone(),
        link,
        wake,
        shutdown_tx.subscribe(),
    ));

    let api_task = {
        let state = groundlink_api::ApiState {
            engine: engine.clone(),
            node_name: config.node.name.clone(),
            started_at: Instant::now(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = groundlink_api::serve(state, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = harvest_task       => tracing::error!("harvest loop exited: {:?}", r),
        r = receive_task       => tracing::error!("receive loop exited: {:?}", r),
        r = api_task           => tracing::error!("API server exited: {:?}", r),
    }

    // Final checkpoint of everything in flight.
    let saved = engine.lock().await.checkpoint_all();
    tracing::info!(saved, "checkpoints flushed");

    Ok(())
}
