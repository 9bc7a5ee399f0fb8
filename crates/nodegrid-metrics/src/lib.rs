//! nodegrid-metrics — Prometheus exposition for the control plane.
//!
//! Renders the cluster summary, per-node load, and allocation counts in
//! the Prometheus text format for the `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ClusterQuery::cluster_summary() ─┐
//! ClusterQuery::list_all_nodes()  ─┼─▶ render_prometheus() → text/plain
//! Allocator::list_allocations()   ─┘
//! ```

pub mod prometheus;

pub use prometheus::render_prometheus;
