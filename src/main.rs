//! busylight-daemon: drives a busy-light from microphone activity
//!
//! This daemon runs in the background and provides:
//! - Periodic sampling of the OS microphone consent store
//! - A debounced Active/Idle status with change events
//! - A BLE or serial link to the indicator, with rate-limited color sends
//! - A per-session liveness monitor that reports lost connections
//! - IPC server for the tray UI (status, control, settings, events)

mod activity;
mod color;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod link;
mod orchestrator;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Settings};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "busylight-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.data_dir, "configuration loaded");

    let store = config.settings_store();
    let settings = store.load().unwrap_or_else(|e| {
        warn!(error = %format!("{:#}", e), "failed to load settings, using defaults");
        Settings::default()
    });
    info!(
        path = ?store.path(),
        transport = %settings.transport,
        filter = settings.filter(),
        "settings loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    let link = link::open(settings.transport)?;
    let sampler = activity::host_sampler();
    let auto_start = settings.auto_start;
    let auto_connect = settings.auto_connect;

    let orchestrator = Orchestrator::new(settings, link, sampler, Some(store));
    let mut events = orchestrator.subscribe();

    // Create IPC server
    let server = Server::new(&config.socket_path, Arc::clone(&orchestrator))?;

    if auto_start {
        orchestrator.start_monitoring();
    }

    if auto_connect {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.connect_peripheral().await {
                warn!(error = %e, "auto-connect failed");
            }
        });
    }

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log core events
        _ = async {
            loop {
                match events.recv().await {
                    Ok(event) => info!(%event, "core event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event logger exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    orchestrator.shutdown().await;
    server.shutdown().await;

    info!("busylight-daemon stopped");

    Ok(())
}
