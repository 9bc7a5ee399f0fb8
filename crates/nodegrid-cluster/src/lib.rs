//! nodegrid-cluster — node liveness, registration, and cluster queries.
//!
//! Nodes push periodic reports; this crate decides which of them are live
//! and answers questions about the fleet.
//!
//! # Architecture
//!
//! ```text
//! Node agent ── POST report ──▶ NodeRegistry
//!                                 ├── LivenessStore (snapshot, TTL)
//!                                 └── StateStore   (node catalog, metric history)
//!
//! Clients ──▶ ClusterQuery
//!               ├── live snapshots  (degrades to empty if liveness is down)
//!               ├── node catalog    (stale / inactive nodes)
//!               └── Selector        (filters, scores, picks)
//!
//! Sweeper ──▶ NodeRegistry::sweep  (stale nodes, metric retention, purge)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

pub mod error;
pub mod liveness;
pub mod query;
pub mod registry;

pub use error::{ClusterError, ClusterResult, LivenessError};
pub use liveness::{LivenessStore, MemoryLiveness};
pub use query::{ClusterQuery, ClusterSummary, HealthBuckets, LiveLoad, NodeView, ScoreStats};
pub use registry::{NodeRegistry, SweepReport};

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
