//! nodegated - connection admission and node dispatch daemon.
//!
//! Accepts telnet, SSH, binkp and HTTP status connections, screens each
//! caller, claims a node and hands the connection to a worker process.

mod config;
mod error;
mod http;
mod launch;
mod metrics;
mod network;
mod nodes;
mod security;
mod state;
mod telemetry;

use crate::config::Config;
use crate::launch::WorkerRegistry;
use crate::network::{Dispatcher, ListenerSet};
use crate::nodes::ConnectionType;
use crate::state::DaemonState;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between auto-block state sweeps.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nodegate.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        server = %config.server.name,
        services = config.services.len(),
        launch_mode = ?config.server.launch_mode,
        "Starting nodegate"
    );

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("cannot create data directory {}", config.server.data_dir.display())
    })?;

    // Metrics are served on the HTTP status port.
    if config.ports.http.is_some_and(|p| p != 0) {
        metrics::init();
        info!("Metrics initialized");
    }

    let endpoints = config.ports.endpoints(config.server.bind_address);
    let registry = Arc::new(WorkerRegistry::new());
    let state = Arc::new(
        DaemonState::build(config, Arc::clone(&registry)).context("cannot build daemon state")?,
    );

    let mut listeners = ListenerSet::new();
    for (addr, target) in endpoints {
        listeners.add(addr, target, target.name()).await;
    }
    if listeners.is_empty() {
        warn!("No listeners bound");
    }
    for (addr, target) in listeners.local_addrs() {
        if target == ConnectionType::Http {
            info!(%addr, "Status endpoint available at /status and /metrics");
        }
    }

    // Sweep lapsed auto-block entries
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = state.reputation.auto_block().prune_expired();
                if removed > 0 {
                    info!(removed, "Expired auto-block entries pruned");
                }
            }
        });
    }

    // Shutdown: stop accepting and pass SIGTERM on to the latest worker.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown requested");
            registry.forward_shutdown();
            cancel.cancel();
        });
    }

    listeners
        .run(cancel, Dispatcher::new(Arc::clone(&state)))
        .await?;

    info!("nodegate stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot install SIGTERM handler, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
