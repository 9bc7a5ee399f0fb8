//! Read-only views over live and durable node state.
//!
//! Reads that need the liveness store degrade to "no live nodes" when it
//! is unavailable, logging a warning instead of failing the request. The
//! durable catalog remains authoritative for which nodes exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use nodegrid_placement::{LoadBand, NodeFilter, ScoredNode, Selector, Strategy};
use nodegrid_state::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ClusterError, ClusterResult};
use crate::liveness::LivenessStore;

/// Current utilization of a live node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveLoad {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disk_percent: f64,
    pub workloads: WorkloadCounts,
    pub load_score: f64,
    pub band: LoadBand,
    pub last_updated: u64,
}

/// A node as seen by clients: catalog fields plus live load if reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub hostname: Hostname,
    pub ip: String,
    pub cpu_cores: u32,
    pub ram_gb: f64,
    pub has_gpu: bool,
    pub gpus: Vec<GpuDevice>,
    pub max_containers: u32,
    /// Durable active flag; false once the stale sweep has run.
    pub is_active: bool,
    /// Whether an unexpired liveness entry exists right now.
    pub is_live: bool,
    pub registered_at: Option<u64>,
    pub load: Option<LiveLoad>,
}

/// Health buckets over live nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthBuckets {
    /// cpu < 80 and mem < 85.
    pub healthy: usize,
    pub warning: usize,
    /// cpu >= 90 or mem >= 90.
    pub overloaded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Aggregate view of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub live_nodes: usize,
    pub workloads: WorkloadCounts,
    pub avg_cpu_percent: f64,
    pub avg_mem_percent: f64,
    pub avg_disk_percent: f64,
    pub health: HealthBuckets,
    pub gpu_nodes: usize,
    pub gpu_devices: usize,
    pub load_score: Option<ScoreStats>,
    pub round_robin_cursor: u32,
}

/// Query façade over the liveness store, node catalog and selector.
#[derive(Clone)]
pub struct ClusterQuery {
    state: StateStore,
    liveness: Arc<dyn LivenessStore>,
    selector: Arc<Selector>,
}

impl ClusterQuery {
    pub fn new(state: StateStore, liveness: Arc<dyn LivenessStore>, selector: Arc<Selector>) -> Self {
        Self {
            state,
            liveness,
            selector,
        }
    }

    /// Live snapshots, or none if the liveness store cannot be read.
    pub fn live_nodes(&self) -> Vec<NodeSnapshot> {
        match self.liveness.list_live() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "liveness store unavailable, treating cluster as empty");
                Vec::new()
            }
        }
    }

    fn live_node(&self, hostname: &str) -> Option<NodeSnapshot> {
        match self.liveness.get(hostname) {
            Ok(node) => node,
            Err(e) => {
                warn!(%hostname, error = %e, "liveness store unavailable");
                None
            }
        }
    }

    fn view(&self, record: Option<NodeRecord>, live: Option<NodeSnapshot>) -> Option<NodeView> {
        let load = live.as_ref().map(|snap| LiveLoad {
            cpu_percent: snap.cpu_percent,
            mem_percent: snap.mem_percent,
            disk_percent: snap.disk_percent,
            workloads: snap.workloads,
            load_score: self.selector.score(snap),
            band: self.selector.weights().band(snap.cpu_percent, snap.mem_percent),
            last_updated: snap.last_updated,
        });
        let is_live = live.is_some();
        match (record, live) {
            // Prefer the fresher live copy of the static fields.
            (record, Some(snap)) => Some(NodeView {
                hostname: snap.hostname,
                ip: snap.ip,
                cpu_cores: snap.cpu_cores,
                ram_gb: snap.ram_gb,
                has_gpu: snap.has_gpu,
                gpus: snap.gpus,
                max_containers: record.as_ref().map_or(DEFAULT_MAX_CONTAINERS, |r| r.max_containers),
                is_active: record.as_ref().is_none_or(|r| r.is_active),
                is_live,
                registered_at: record.map(|r| r.created_at),
                load,
            }),
            (Some(record), None) => Some(NodeView {
                hostname: record.hostname,
                ip: record.ip,
                cpu_cores: record.cpu_cores,
                ram_gb: record.ram_gb,
                has_gpu: record.has_gpu,
                gpus: record.gpus,
                max_containers: record.max_containers,
                is_active: record.is_active,
                is_live,
                registered_at: Some(record.created_at),
                load,
            }),
            (None, None) => None,
        }
    }

    /// Every live node, plus non-reporting catalog nodes if `include_stale`.
    /// Sorted by hostname.
    pub fn list_all_nodes(&self, include_stale: bool) -> ClusterResult<Vec<NodeView>> {
        let mut live: BTreeMap<Hostname, NodeSnapshot> = self
            .live_nodes()
            .into_iter()
            .map(|snap| (snap.hostname.clone(), snap))
            .collect();
        let mut records: BTreeMap<Hostname, NodeRecord> = self
            .state
            .list_nodes()?
            .into_iter()
            .map(|r| (r.hostname.clone(), r))
            .collect();

        let mut hostnames: Vec<Hostname> = live.keys().cloned().collect();
        if include_stale {
            hostnames.extend(records.keys().filter(|h| !live.contains_key(*h)).cloned());
            hostnames.sort();
        }

        Ok(hostnames
            .into_iter()
            .filter_map(|h| self.view(records.remove(&h), live.remove(&h)))
            .collect())
    }

    /// Live nodes passing `filter`, best first.
    pub fn list_available_nodes(&self, filter: &NodeFilter) -> Vec<ScoredNode> {
        self.selector.rank(&self.live_nodes(), filter)
    }

    /// A single node picked by `strategy`, if any is eligible.
    pub fn pick_node(&self, filter: &NodeFilter, strategy: Strategy) -> Option<ScoredNode> {
        self.select_nodes(filter, 1, strategy).into_iter().next()
    }

    /// Up to `count` eligible nodes picked by `strategy`. Nothing is reserved.
    pub fn select_nodes(&self, filter: &NodeFilter, count: usize, strategy: Strategy) -> Vec<ScoredNode> {
        self.selector.select(&self.live_nodes(), filter, count, strategy)
    }

    /// One node by hostname, whether live, stale, or both.
    pub fn get_node(&self, hostname: &str) -> ClusterResult<NodeView> {
        let record = self.state.get_node(hostname)?;
        let live = self.live_node(hostname);
        self.view(record, live)
            .ok_or_else(|| ClusterError::NodeNotFound(hostname.to_string()))
    }

    /// Metric samples for a node recorded at or after `since`, newest first.
    pub fn node_metrics_history(&self, hostname: &str, since: u64) -> ClusterResult<Vec<NodeMetric>> {
        Ok(self.state.list_node_metrics(hostname, since)?)
    }

    pub fn cluster_summary(&self) -> ClusterResult<ClusterSummary> {
        let records = self.state.list_nodes()?;
        let live = self.live_nodes();

        let mut workloads = WorkloadCounts::default();
        let mut health = HealthBuckets::default();
        let (mut cpu, mut mem, mut disk) = (0.0, 0.0, 0.0);
        let mut scores = Vec::with_capacity(live.len());
        let mut gpu_nodes = 0;
        let mut gpu_devices = 0;

        for node in &live {
            workloads.accumulate(&node.workloads);
            cpu += node.cpu_percent;
            mem += node.mem_percent;
            disk += node.disk_percent;
            scores.push(self.selector.score(node));

            if node.cpu_percent >= 90.0 || node.mem_percent >= 90.0 {
                health.overloaded += 1;
            } else if node.cpu_percent < 80.0 && node.mem_percent < 85.0 {
                health.healthy += 1;
            } else {
                health.warning += 1;
            }

            if node.has_gpu || !node.gpus.is_empty() {
                gpu_nodes += 1;
                gpu_devices += node.gpus.len();
            }
        }

        let n = live.len() as f64;
        let avg = |total: f64| if live.is_empty() { 0.0 } else { round2(total / n) };
        let load_score = (!scores.is_empty()).then(|| ScoreStats {
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg: round2(scores.iter().sum::<f64>() / n),
        });

        Ok(ClusterSummary {
            total_nodes: records.len(),
            active_nodes: records.iter().filter(|r| r.is_active).count(),
            live_nodes: live.len(),
            workloads,
            avg_cpu_percent: avg(cpu),
            avg_mem_percent: avg(mem),
            avg_disk_percent: avg(disk),
            health,
            gpu_nodes,
            gpu_devices,
            load_score,
            round_robin_cursor: self.selector.cursor(),
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LivenessError;
    use crate::liveness::MemoryLiveness;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    struct DownLiveness;

    impl LivenessStore for DownLiveness {
        fn upsert(&self, _: NodeSnapshot, _: Duration) -> Result<(), LivenessError> {
            Err(LivenessError::Unavailable("down".to_string()))
        }
        fn get(&self, _: &str) -> Result<Option<NodeSnapshot>, LivenessError> {
            Err(LivenessError::Unavailable("down".to_string()))
        }
        fn list_live(&self) -> Result<Vec<NodeSnapshot>, LivenessError> {
            Err(LivenessError::Unavailable("down".to_string()))
        }
        fn delete(&self, _: &str) -> Result<bool, LivenessError> {
            Err(LivenessError::Unavailable("down".to_string()))
        }
        fn purge_expired(&self) -> Result<usize, LivenessError> {
            Err(LivenessError::Unavailable("down".to_string()))
        }
    }

    fn snap(hostname: &str, cpu: f64, mem: f64) -> NodeSnapshot {
        let mut s = NodeSnapshot::new(hostname, "10.0.0.1", cpu, mem);
        s.cpu_cores = 8;
        s.ram_gb = 32.0;
        s
    }

    fn setup() -> (ClusterQuery, StateStore, Arc<MemoryLiveness>) {
        let state = StateStore::open_in_memory().unwrap();
        let liveness = Arc::new(MemoryLiveness::default());
        let query = ClusterQuery::new(state.clone(), liveness.clone(), Arc::new(Selector::default()));
        (query, state, liveness)
    }

    #[test]
    fn list_all_nodes_hides_stale_unless_asked() {
        let (query, state, liveness) = setup();
        liveness.upsert(snap("live", 10.0, 10.0), TTL).unwrap();
        state.put_node(&NodeRecord::from_snapshot(&snap("live", 10.0, 10.0), 1000)).unwrap();
        let mut gone = NodeRecord::from_snapshot(&snap("gone", 10.0, 10.0), 500);
        gone.is_active = false;
        state.put_node(&gone).unwrap();

        let nodes = query.list_all_nodes(false).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_live);
        assert_eq!(nodes[0].registered_at, Some(1000));

        let nodes = query.list_all_nodes(true).unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(names, vec!["gone", "live"]);
        assert!(!nodes[0].is_live);
        assert!(nodes[0].load.is_none());
    }

    #[test]
    fn get_node_falls_back_to_catalog() {
        let (query, state, _) = setup();
        state.put_node(&NodeRecord::from_snapshot(&snap("n1", 10.0, 10.0), 1000)).unwrap();

        let mut record = NodeRecord::from_snapshot(&snap("n2", 10.0, 10.0), 1000);
        record.max_containers = 4;
        state.put_node(&record).unwrap();

        let view = query.get_node("n1").unwrap();
        assert!(!view.is_live);
        assert_eq!(view.max_containers, DEFAULT_MAX_CONTAINERS);
        assert_eq!(query.get_node("n2").unwrap().max_containers, 4);
        assert!(matches!(query.get_node("missing"), Err(ClusterError::NodeNotFound(_))));
    }

    #[test]
    fn available_and_pick_use_filter() {
        let (query, _, liveness) = setup();
        liveness.upsert(snap("a", 10.0, 10.0), TTL).unwrap();
        liveness.upsert(snap("b", 50.0, 50.0), TTL).unwrap();
        liveness.upsert(snap("c", 95.0, 95.0), TTL).unwrap();

        let available = query.list_available_nodes(&NodeFilter::Strict);
        assert_eq!(available.len(), 2);
        let picked = query.pick_node(&NodeFilter::Strict, Strategy::BestFit).unwrap();
        assert_eq!(picked.node.hostname, "a");
        assert_eq!(picked.load_score, 10.0);
    }

    #[test]
    fn summary_buckets_and_averages() {
        let (query, _, liveness) = setup();
        let mut gpu = snap("gpu", 50.0, 50.0);
        gpu.has_gpu = true;
        gpu.gpus = vec![GpuDevice::default(), GpuDevice::default()];
        gpu.workloads.jupyterlab = 2;
        liveness.upsert(gpu, TTL).unwrap();
        liveness.upsert(snap("warm", 82.0, 40.0), TTL).unwrap();
        let mut hot = snap("hot", 95.0, 30.0);
        hot.workloads.ray = 1;
        liveness.upsert(hot, TTL).unwrap();

        let summary = query.cluster_summary().unwrap();
        assert_eq!(summary.live_nodes, 3);
        assert_eq!(summary.health.healthy, 1);
        assert_eq!(summary.health.warning, 1);
        assert_eq!(summary.health.overloaded, 1);
        assert_eq!(summary.gpu_nodes, 1);
        assert_eq!(summary.gpu_devices, 2);
        assert_eq!(summary.workloads.active(), 3);
        assert_eq!(summary.avg_cpu_percent, 75.67);
        let stats = summary.load_score.unwrap();
        assert_eq!(stats.min, 50.0);
        assert_eq!(stats.max, 112.5);
    }

    #[test]
    fn empty_cluster_summary() {
        let (query, _, _) = setup();
        let summary = query.cluster_summary().unwrap();
        assert_eq!(summary.live_nodes, 0);
        assert_eq!(summary.avg_cpu_percent, 0.0);
        assert!(summary.load_score.is_none());
    }

    #[test]
    fn select_nodes_returns_up_to_count() {
        let (query, _, liveness) = setup();
        for (host, load) in [("a", 30.0), ("b", 10.0), ("c", 20.0)] {
            liveness.upsert(snap(host, load, load), TTL).unwrap();
        }

        let picked = query.select_nodes(&NodeFilter::Default, 2, Strategy::BestFit);
        let names: Vec<&str> = picked.iter().map(|n| n.node.hostname.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);

        assert_eq!(query.select_nodes(&NodeFilter::Default, 10, Strategy::BestFit).len(), 3);
    }

    #[test]
    fn summary_workload_totals_saturate() {
        let (query, _, liveness) = setup();
        for host in ["a", "b"] {
            let mut s = snap(host, 10.0, 10.0);
            s.workloads.jupyterlab = 3_000_000_000;
            s.workloads.total_containers = u32::MAX;
            s.workloads.ray = 2;
            liveness.upsert(s, TTL).unwrap();
        }

        let summary = query.cluster_summary().unwrap();
        assert_eq!(summary.workloads.jupyterlab, u32::MAX);
        assert_eq!(summary.workloads.total_containers, u32::MAX);
        assert_eq!(summary.workloads.ray, 4);
    }

    #[test]
    fn unavailable_liveness_degrades_to_empty() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_node(&NodeRecord::from_snapshot(&snap("n1", 10.0, 10.0), 1000)).unwrap();
        let query = ClusterQuery::new(state, Arc::new(DownLiveness), Arc::new(Selector::default()));

        assert!(query.list_available_nodes(&NodeFilter::Any).is_empty());
        assert!(query.pick_node(&NodeFilter::Any, Strategy::RoundRobin).is_none());
        assert!(query.list_all_nodes(false).unwrap().is_empty());
        assert_eq!(query.list_all_nodes(true).unwrap().len(), 1);
        assert!(!query.get_node("n1").unwrap().is_live);
        assert_eq!(query.cluster_summary().unwrap().total_nodes, 1);
    }
}
