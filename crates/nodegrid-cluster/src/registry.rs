//! Node registry — ingests agent reports and sweeps stale nodes.
//!
//! A report refreshes three things: the node's liveness entry (with the
//! configured TTL), its durable catalog record, and its metric history.
//! The sweeper later flips `is_active` off for catalog records whose last
//! report is older than twice the TTL, and prunes old metric samples.

use std::sync::Arc;
use std::time::Duration;

use nodegrid_placement::{ScoringWeights, score};
use nodegrid_state::*;
use tracing::{debug, info, warn};

use crate::epoch_secs;
use crate::error::{ClusterError, ClusterResult};
use crate::liveness::LivenessStore;

/// Result of one sweeper pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub deactivated: Vec<Hostname>,
    pub metrics_pruned: u32,
    pub liveness_purged: usize,
}

/// Accepts node reports and maintains the durable node catalog.
pub struct NodeRegistry {
    state: StateStore,
    liveness: Arc<dyn LivenessStore>,
    weights: ScoringWeights,
    ttl: Duration,
    metrics_retention: Duration,
}

impl NodeRegistry {
    /// Create a registry with a 45s TTL and 24h metric retention.
    pub fn new(state: StateStore, liveness: Arc<dyn LivenessStore>) -> Self {
        Self {
            state,
            liveness,
            weights: ScoringWeights::default(),
            ttl: Duration::from_secs(45),
            metrics_retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Set the liveness TTL applied to each report.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the weights used to score recorded metric samples.
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set how long metric samples are kept.
    pub fn with_metrics_retention(mut self, retention: Duration) -> Self {
        self.metrics_retention = retention;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records older than this are considered stale.
    pub fn stale_after(&self) -> Duration {
        self.ttl * 2
    }

    /// Ingest one agent report. Returns the node's computed load score.
    ///
    /// The report's own timestamp is ignored; liveness is measured from
    /// receipt so agent clock skew cannot extend or shorten it.
    ///
    /// The durable write commits before the liveness upsert, so a node is
    /// never schedulable without a catalog record.
    pub fn report(&self, mut snapshot: NodeSnapshot) -> ClusterResult<f64> {
        validate_report(&snapshot)?;
        let now = epoch_secs();
        snapshot.last_updated = now;
        let load_score = score(&snapshot, &self.weights);

        let metric = NodeMetric {
            hostname: snapshot.hostname.clone(),
            recorded_at: now,
            cpu_percent: snapshot.cpu_percent,
            mem_percent: snapshot.mem_percent,
            disk_percent: snapshot.disk_percent,
            workloads: snapshot.workloads,
            load_score,
        };
        let registered = self.state.write(|tx| {
            let (record, registered) = match tx.get_node(&snapshot.hostname)? {
                Some(mut record) => {
                    record.refresh(&snapshot, now);
                    (record, false)
                }
                None => (NodeRecord::from_snapshot(&snapshot, now), true),
            };
            tx.put_node(&record)?;
            tx.put_node_metric(&metric)?;
            Ok::<_, StateError>(registered)
        })?;

        let hostname = snapshot.hostname.clone();
        self.liveness.upsert(snapshot, self.ttl)?;

        if registered {
            info!(%hostname, "node registered");
        } else {
            debug!(%hostname, load_score, "node report accepted");
        }
        Ok(load_score)
    }

    /// Clear `is_active` on every node whose last report is older than
    /// twice the TTL. Each node is committed separately; a failure on one
    /// node is logged and the sweep moves on.
    pub fn mark_stale_nodes_inactive(&self) -> ClusterResult<Vec<Hostname>> {
        let cutoff = epoch_secs().saturating_sub(self.stale_after().as_secs());
        let mut deactivated = Vec::new();

        for node in self.state.list_nodes()? {
            if !node.is_active || node.updated_at >= cutoff {
                continue;
            }
            match self.state.deactivate_node(&node.hostname) {
                Ok(true) => {
                    warn!(hostname = %node.hostname, last_seen = node.updated_at, "node marked inactive");
                    deactivated.push(node.hostname);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(hostname = %node.hostname, error = %e, "failed to mark node inactive");
                }
            }
        }

        Ok(deactivated)
    }

    /// Drop metric samples older than the retention window.
    pub fn prune_metrics(&self) -> ClusterResult<u32> {
        let cutoff = epoch_secs().saturating_sub(self.metrics_retention.as_secs());
        Ok(self.state.prune_node_metrics(cutoff)?)
    }

    /// Run every maintenance task once.
    pub fn sweep(&self) -> ClusterResult<SweepReport> {
        let report = SweepReport {
            deactivated: self.mark_stale_nodes_inactive()?,
            metrics_pruned: self.prune_metrics()?,
            liveness_purged: self.liveness.purge_expired()?,
        };
        if !report.deactivated.is_empty() || report.metrics_pruned > 0 {
            info!(
                deactivated = report.deactivated.len(),
                metrics_pruned = report.metrics_pruned,
                liveness_purged = report.liveness_purged,
                "sweep completed"
            );
        }
        Ok(report)
    }
}

fn validate_report(snapshot: &NodeSnapshot) -> ClusterResult<()> {
    if snapshot.hostname.trim().is_empty() {
        return Err(ClusterError::Validation("hostname must not be empty".to_string()));
    }
    if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(ClusterError::Validation(format!(
            "unsupported snapshot schema version {}",
            snapshot.schema_version
        )));
    }
    for (field, value) in [
        ("cpu_percent", snapshot.cpu_percent),
        ("mem_percent", snapshot.mem_percent),
        ("disk_percent", snapshot.disk_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ClusterError::Validation(format!(
                "{field} must be between 0 and 100, got {value}"
            )));
        }
    }
    Ok(())
}
