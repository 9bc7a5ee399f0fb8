//! Prometheus text exposition format.
//!
//! Renders cluster state into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use nodegrid_cluster::{ClusterSummary, NodeView};
use nodegrid_state::{Allocation, AllocationStatus};

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    header(out, name, help);
    let _ = writeln!(out, "{name} {value}");
}

/// Escape a label value per the exposition format.
fn label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render cluster-wide gauges, per-node load for live nodes, and
/// allocation counts by status.
pub fn render_prometheus(summary: &ClusterSummary, nodes: &[NodeView], allocations: &[Allocation]) -> String {
    let mut out = String::new();

    gauge(&mut out, "nodegrid_nodes_total", "Nodes in the durable catalog.", summary.total_nodes);
    gauge(&mut out, "nodegrid_nodes_active", "Catalog nodes not marked stale.", summary.active_nodes);
    gauge(&mut out, "nodegrid_nodes_live", "Nodes with an unexpired report.", summary.live_nodes);

    header(&mut out, "nodegrid_nodes_health", "Live nodes per health bucket.");
    for (bucket, count) in [
        ("healthy", summary.health.healthy),
        ("warning", summary.health.warning),
        ("overloaded", summary.health.overloaded),
    ] {
        let _ = writeln!(out, "nodegrid_nodes_health{{bucket=\"{bucket}\"}} {count}");
    }

    gauge(&mut out, "nodegrid_gpu_nodes", "Live nodes with at least one GPU.", summary.gpu_nodes);
    gauge(&mut out, "nodegrid_gpu_devices", "GPU devices on live nodes.", summary.gpu_devices);

    header(&mut out, "nodegrid_workloads", "Running workload containers on live nodes.");
    for (kind, count) in [
        ("jupyterlab", summary.workloads.jupyterlab),
        ("ray", summary.workloads.ray),
        ("total", summary.workloads.total_containers),
    ] {
        let _ = writeln!(out, "nodegrid_workloads{{kind=\"{kind}\"}} {count}");
    }

    gauge(&mut out, "nodegrid_avg_cpu_percent", "Mean CPU utilization of live nodes.", format!("{:.2}", summary.avg_cpu_percent));
    gauge(&mut out, "nodegrid_avg_mem_percent", "Mean memory utilization of live nodes.", format!("{:.2}", summary.avg_mem_percent));
    gauge(&mut out, "nodegrid_round_robin_cursor", "Current round-robin selection cursor.", summary.round_robin_cursor);

    let live: Vec<_> = nodes
        .iter()
        .filter_map(|n| n.load.as_ref().map(|load| (label(&n.hostname), load)))
        .collect();

    header(&mut out, "nodegrid_node_cpu_percent", "CPU utilization per live node.");
    for (host, load) in &live {
        let _ = writeln!(out, "nodegrid_node_cpu_percent{{hostname=\"{host}\"}} {:.2}", load.cpu_percent);
    }
    header(&mut out, "nodegrid_node_mem_percent", "Memory utilization per live node.");
    for (host, load) in &live {
        let _ = writeln!(out, "nodegrid_node_mem_percent{{hostname=\"{host}\"}} {:.2}", load.mem_percent);
    }
    header(&mut out, "nodegrid_node_load_score", "Load score per live node (lower is better).");
    for (host, load) in &live {
        let _ = writeln!(out, "nodegrid_node_load_score{{hostname=\"{host}\"}} {:.2}", load.load_score);
    }

    header(&mut out, "nodegrid_allocations", "Allocations by status.");
    for status in [
        AllocationStatus::Allocated,
        AllocationStatus::Running,
        AllocationStatus::Stopped,
        AllocationStatus::Failed,
    ] {
        let count = allocations.iter().filter(|a| a.status == status).count();
        let _ = writeln!(out, "nodegrid_allocations{{status=\"{}\"}} {count}", status.as_str());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodegrid_cluster::{HealthBuckets, LiveLoad};
    use nodegrid_placement::LoadBand;
    use nodegrid_state::WorkloadCounts;

    fn summary() -> ClusterSummary {
        ClusterSummary {
            total_nodes: 3,
            active_nodes: 2,
            live_nodes: 1,
            workloads: WorkloadCounts {
                jupyterlab: 4,
                ray: 1,
                total_containers: 7,
            },
            avg_cpu_percent: 42.5,
            avg_mem_percent: 30.0,
            avg_disk_percent: 10.0,
            health: HealthBuckets {
                healthy: 1,
                warning: 0,
                overloaded: 0,
            },
            gpu_nodes: 1,
            gpu_devices: 2,
            load_score: None,
            round_robin_cursor: 7,
        }
    }

    fn node(hostname: &str, live: bool) -> NodeView {
        NodeView {
            hostname: hostname.to_string(),
            ip: "10.0.0.1".to_string(),
            cpu_cores: 8,
            ram_gb: 32.0,
            has_gpu: false,
            gpus: Vec::new(),
            max_containers: 10,
            is_active: true,
            is_live: live,
            registered_at: Some(1000),
            load: live.then(|| LiveLoad {
                cpu_percent: 42.5,
                mem_percent: 30.0,
                disk_percent: 10.0,
                workloads: WorkloadCounts::default(),
                load_score: 36.25,
                band: LoadBand::Normal,
                last_updated: 1000,
            }),
        }
    }

    fn allocation(status: AllocationStatus) -> Allocation {
        Allocation {
            id: "a".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            profile_id: "p".to_string(),
            hostname: "node-1".to_string(),
            node_ip: "10.0.0.1".to_string(),
            status,
            container_id: None,
            port: None,
            created_at: 1000,
            started_at: None,
            stopped_at: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn render_empty_cluster() {
        let empty = ClusterSummary {
            total_nodes: 0,
            active_nodes: 0,
            live_nodes: 0,
            workloads: WorkloadCounts::default(),
            avg_cpu_percent: 0.0,
            avg_mem_percent: 0.0,
            avg_disk_percent: 0.0,
            health: HealthBuckets::default(),
            gpu_nodes: 0,
            gpu_devices: 0,
            load_score: None,
            round_robin_cursor: 0,
        };
        let output = render_prometheus(&empty, &[], &[]);
        // Type declarations are present even with no samples.
        assert!(output.contains("# TYPE nodegrid_node_load_score gauge"));
        assert!(output.contains("nodegrid_nodes_live 0"));
        assert!(output.contains("nodegrid_allocations{status=\"running\"} 0"));
    }

    #[test]
    fn render_cluster_gauges() {
        let output = render_prometheus(&summary(), &[], &[]);

        assert!(output.contains("nodegrid_nodes_total 3"));
        assert!(output.contains("nodegrid_nodes_health{bucket=\"healthy\"} 1"));
        assert!(output.contains("nodegrid_workloads{kind=\"jupyterlab\"} 4"));
        assert!(output.contains("nodegrid_avg_cpu_percent 42.50"));
        assert!(output.contains("nodegrid_round_robin_cursor 7"));
    }

    #[test]
    fn render_per_node_only_for_live() {
        let output = render_prometheus(&summary(), &[node("live-1", true), node("stale-1", false)], &[]);

        assert!(output.contains("nodegrid_node_load_score{hostname=\"live-1\"} 36.25"));
        assert!(!output.contains("stale-1"));
    }

    #[test]
    fn render_allocation_counts() {
        let allocations = vec![
            allocation(AllocationStatus::Running),
            allocation(AllocationStatus::Running),
            allocation(AllocationStatus::Failed),
        ];
        let output = render_prometheus(&summary(), &[], &allocations);

        assert!(output.contains("nodegrid_allocations{status=\"running\"} 2"));
        assert!(output.contains("nodegrid_allocations{status=\"failed\"} 1"));
        assert!(output.contains("nodegrid_allocations{status=\"allocated\"} 0"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(label("a\"b"), "a\\\"b");
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&summary(), &[node("n1", true)], &[allocation(AllocationStatus::Allocated)]);

        // Every sample line is `name{labels} value` or `name value`.
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.rsplitn(2, ' ').collect();
            assert_eq!(parts.len(), 2, "malformed line: {line}");
            assert!(parts[0].parse::<f64>().is_ok(), "non-numeric value: {line}");
        }
    }
}
