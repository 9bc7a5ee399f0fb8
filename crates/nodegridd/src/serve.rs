//! Serve mode: open the store, wire the components, and run the API
//! server alongside the sweeper until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use nodegrid_api::{ApiState, build_router};
use nodegrid_cluster::MemoryLiveness;
use nodegrid_core::NodegridConfig;
use nodegrid_state::StateStore;
use tokio::sync::watch;
use tracing::info;

use crate::sweeper::Sweeper;

fn open_state(config: &NodegridConfig) -> anyhow::Result<ApiState> {
    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("nodegrid.redb");

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let liveness = Arc::new(MemoryLiveness::new(config.liveness.shards));
    let state = ApiState::new(store, liveness, config)?;

    if config.allocation.seed_default_profiles {
        let created = state.catalog.seed_defaults()?;
        if !created.is_empty() {
            info!(profiles = ?created, "seeded default profiles");
        }
    }
    Ok(state)
}

/// Create the store and seed profiles without starting the server.
pub fn init(config: &NodegridConfig) -> anyhow::Result<()> {
    let state = open_state(config)?;
    let profiles = state.catalog.list(true)?;
    info!(
        data_dir = ?config.server.data_dir,
        active_profiles = profiles.len(),
        "store initialized"
    );
    Ok(())
}

pub async fn run(config: NodegridConfig) -> anyhow::Result<()> {
    info!("nodegrid daemon starting");
    let state = open_state(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Sweeper::new(state.registry.clone(), config.sweeper.interval());
    info!(
        interval_secs = config.sweeper.interval_secs,
        ttl_secs = config.liveness.ttl_secs,
        "sweeper initialized"
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, strategy = %config.allocation.strategy, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = sweeper_handle.await;

    info!("nodegrid daemon stopped");
    Ok(())
}
