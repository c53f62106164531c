//! wgmeshd — self-healing tunnel mesh daemon.
//!
//! Usage: `wgmeshd [interface]`. Everything else comes from the config file
//! and WGMESH_* environment variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use wgmesh_core::config::{MeshConfig, RegistryBackend};
use wgmesh_services::{
    KernelApplier, LocalNode, MemoryRegistry, Reconciler, Registry, SqliteRegistry, TunnelApplier,
};

mod status;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshConfig::load().context("failed to load config")?;
    if let Some(interface) = std::env::args().nth(1) {
        config.node.interface = interface;
    }
    tracing::info!(
        interface = %config.node.interface,
        config = %MeshConfig::file_path().display(),
        "wgmeshd starting"
    );

    // Registry
    let registry: Arc<dyn Registry> = match config.registry.backend {
        RegistryBackend::Sqlite => {
            let path = &config.registry.path;
            tracing::info!(path = %path.display(), "opening sqlite registry");
            Arc::new(
                SqliteRegistry::open(path)
                    .with_context(|| format!("failed to open registry {}", path.display()))?,
            )
        }
        RegistryBackend::Memory => {
            tracing::warn!("memory registry selected, this node will not see any other node");
            Arc::new(MemoryRegistry::new())
        }
    };

    // Local node: endpoint, address, key material
    let node = Arc::new(LocalNode::from_config(registry, &config.node)?);
    tracing::info!(
        public_key = %node.public_key(),
        address = %node.network(),
        endpoint = %node.peer().endpoint,
        "local node ready"
    );

    node.register().await?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Reconciler ───────────────────────────────────────────────────────────
    let applier = Arc::new(KernelApplier::new());
    let reconciler = Reconciler::new(node.clone(), applier.clone(), shutdown_tx.subscribe())
        .with_poll_interval(Duration::from_secs(config.reconcile.poll_interval_secs.max(1)))
        .with_allowed_ips(config.reconcile.allowed_ips);

    // Status HTTP endpoint
    if config.api.port != 0 {
        let state = status::StatusState {
            node: node.clone(),
            snapshot: reconciler.snapshot(),
            applier: applier as Arc<dyn TunnelApplier>,
        };
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────
    let result = reconciler.run().await;

    if let Err(e) = node.deregister().await {
        tracing::warn!(error = %e, "failed to leave mesh on exit");
    }

    match result {
        Ok(()) => {
            tracing::info!("shut down cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "reconciler stopped");
            Err(e.into())
        }
    }
}
