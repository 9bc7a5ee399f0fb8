//! Periodic maintenance loop.

use std::sync::Arc;
use std::time::Duration;

use nodegrid_cluster::NodeRegistry;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Runs `NodeRegistry::sweep` on a fixed interval until shutdown.
pub struct Sweeper {
    registry: Arc<NodeRegistry>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<NodeRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    async fn sweep_once(&self) {
        let registry = self.registry.clone();
        // redb transactions block; keep them off the runtime workers.
        match tokio::task::spawn_blocking(move || registry.sweep()).await {
            Ok(Ok(report)) => debug!(
                deactivated = report.deactivated.len(),
                metrics_pruned = report.metrics_pruned,
                liveness_purged = report.liveness_purged,
                "sweep pass finished"
            ),
            Ok(Err(e)) => warn!(error = %e, "sweep failed"),
            Err(e) => warn!(error = %e, "sweep task panicked"),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    info!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}
