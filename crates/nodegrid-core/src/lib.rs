//! nodegrid-core — configuration shared by every nodegrid crate.
//!
//! All tunables of the control plane (liveness TTL, scoring weights,
//! filter thresholds, sweeper cadence) live in one `nodegrid.toml`
//! document. Every field has a default, so an empty file is valid.

pub mod config;

pub use config::{
    AllocationConfig, FilterThresholds, FiltersConfig, LivenessConfig, NodegridConfig,
    ScoringConfig, ServerConfig, SweeperConfig,
};
