//! Domain types for the nodegrid state store.
//!
//! These types represent live node snapshots, the durable node catalog,
//! resource profiles, sessions, and allocations. All types are
//! serializable to/from JSON for storage in redb tables and on the wire.

use serde::{Deserialize, Serialize};

/// Hostname of a node; the unique key for snapshots and node records.
pub type Hostname = String;

/// Unique identifier for a profile.
pub type ProfileId = String;

/// Client-supplied identifier for a session.
pub type SessionId = String;

/// Unique identifier for an allocation.
pub type AllocationId = String;

/// Current `NodeSnapshot` schema version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

// ── Node snapshot ─────────────────────────────────────────────────

/// Most recent self-report of a node, held by the liveness store.
///
/// Utilization fields default to 100% so that a node which does not
/// report load is never preferred over one that does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub hostname: Hostname,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub ram_gb: f64,
    #[serde(default)]
    pub has_gpu: bool,
    #[serde(default)]
    pub gpus: Vec<GpuDevice>,
    #[serde(default = "full_utilization")]
    pub cpu_percent: f64,
    #[serde(default = "full_utilization")]
    pub mem_percent: f64,
    #[serde(default = "full_utilization")]
    pub disk_percent: f64,
    #[serde(default)]
    pub workloads: WorkloadCounts,
    /// Unix timestamp (seconds) of the report. Agents send it as `timestamp`.
    #[serde(default, alias = "timestamp")]
    pub last_updated: u64,
}

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

fn full_utilization() -> f64 {
    100.0
}

/// A GPU device as reported by the node agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GpuDevice {
    pub name: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub memory_total_mb: Option<u64>,
    #[serde(default)]
    pub memory_used_mb: Option<u64>,
    #[serde(default)]
    pub utilization_percent: Option<f64>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

/// Workload containers currently running on a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WorkloadCounts {
    pub jupyterlab: u32,
    pub ray: u32,
    pub total_containers: u32,
}

impl WorkloadCounts {
    /// Workloads that count against profile and strict-filter limits.
    pub fn active(&self) -> u32 {
        self.jupyterlab.saturating_add(self.ray)
    }

    /// Add another node's counts, clamping at `u32::MAX`.
    pub fn accumulate(&mut self, other: &WorkloadCounts) {
        self.jupyterlab = self.jupyterlab.saturating_add(other.jupyterlab);
        self.ray = self.ray.saturating_add(other.ray);
        self.total_containers = self.total_containers.saturating_add(other.total_containers);
    }
}

impl NodeSnapshot {
    /// Minimal snapshot with the given utilization, used by tests and tools.
    pub fn new(hostname: &str, ip: &str, cpu_percent: f64, mem_percent: f64) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            cpu_cores: 0,
            ram_gb: 0.0,
            has_gpu: false,
            gpus: Vec::new(),
            cpu_percent,
            mem_percent,
            disk_percent: 0.0,
            workloads: WorkloadCounts::default(),
            last_updated: 0,
        }
    }
}

// ── Durable node catalog ──────────────────────────────────────────

/// Durable record of a node that has reported at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub hostname: Hostname,
    pub ip: String,
    pub cpu_cores: u32,
    pub ram_gb: f64,
    pub has_gpu: bool,
    pub gpus: Vec<GpuDevice>,
    pub max_containers: u32,
    /// Cleared by the stale sweep when reports stop arriving.
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl NodeRecord {
    /// Build a fresh record from a snapshot.
    pub fn from_snapshot(snapshot: &NodeSnapshot, now: u64) -> Self {
        Self {
            hostname: snapshot.hostname.clone(),
            ip: snapshot.ip.clone(),
            cpu_cores: snapshot.cpu_cores,
            ram_gb: snapshot.ram_gb,
            has_gpu: snapshot.has_gpu,
            gpus: snapshot.gpus.clone(),
            max_containers: DEFAULT_MAX_CONTAINERS,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh static fields from a newer snapshot, keeping `created_at`.
    pub fn refresh(&mut self, snapshot: &NodeSnapshot, now: u64) {
        self.ip = snapshot.ip.clone();
        self.cpu_cores = snapshot.cpu_cores;
        self.ram_gb = snapshot.ram_gb;
        self.has_gpu = snapshot.has_gpu;
        self.gpus = snapshot.gpus.clone();
        self.is_active = true;
        self.updated_at = now;
    }
}

/// Container capacity assumed for nodes that do not advertise one.
pub const DEFAULT_MAX_CONTAINERS: u32 = 10;

/// One historical utilization sample of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetric {
    pub hostname: Hostname,
    /// Unix timestamp (seconds).
    pub recorded_at: u64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disk_percent: f64,
    pub workloads: WorkloadCounts,
    pub load_score: f64,
}

// ── Profile ───────────────────────────────────────────────────────

/// Named template of resource requirements and health thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub description: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    /// Minimum CPU cores per node.
    pub cpu_cores_min: u32,
    /// Minimum RAM per node in GB.
    pub ram_gb_min: f64,
    pub gpu_required: bool,
    /// Nodes at or above this CPU utilization are ineligible.
    pub max_cpu_percent: f64,
    /// Nodes at or above this memory utilization are ineligible.
    pub max_mem_percent: f64,
    /// Nodes at or above this many active workloads are ineligible.
    pub max_active_workloads: u32,
    /// Higher priority profiles are listed first.
    pub priority: i32,
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Writable fields of a profile, used when creating one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "one")]
    pub min_nodes: u32,
    #[serde(default = "one")]
    pub max_nodes: u32,
    #[serde(default)]
    pub cpu_cores_min: u32,
    #[serde(default)]
    pub ram_gb_min: f64,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default = "default_max_cpu")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_mem")]
    pub max_mem_percent: f64,
    #[serde(default = "default_max_active")]
    pub max_active_workloads: u32,
    #[serde(default)]
    pub priority: i32,
}

fn one() -> u32 {
    1
}

fn default_max_cpu() -> f64 {
    80.0
}

fn default_max_mem() -> f64 {
    85.0
}

fn default_max_active() -> u32 {
    5
}

/// Partial update of a profile; absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub min_nodes: Option<u32>,
    pub max_nodes: Option<u32>,
    pub cpu_cores_min: Option<u32>,
    pub ram_gb_min: Option<f64>,
    pub gpu_required: Option<bool>,
    pub max_cpu_percent: Option<f64>,
    pub max_mem_percent: Option<f64>,
    pub max_active_workloads: Option<u32>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

impl Profile {
    /// Materialize a new active profile from a spec.
    pub fn from_spec(id: ProfileId, spec: ProfileSpec, now: u64) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            min_nodes: spec.min_nodes,
            max_nodes: spec.max_nodes,
            cpu_cores_min: spec.cpu_cores_min,
            ram_gb_min: spec.ram_gb_min,
            gpu_required: spec.gpu_required,
            max_cpu_percent: spec.max_cpu_percent,
            max_mem_percent: spec.max_mem_percent,
            max_active_workloads: spec.max_active_workloads,
            priority: spec.priority,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of nodes to hand out for a request, clamped to the
    /// profile's bounds. Defaults to `min_nodes`.
    pub fn node_count(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.min_nodes)
            .clamp(self.min_nodes, self.min_nodes.max(self.max_nodes))
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: ProfileUpdate, now: u64) {
        if let Some(v) = update.name {
            self.name = v;
        }
        if let Some(v) = update.description {
            self.description = v;
        }
        if let Some(v) = update.min_nodes {
            self.min_nodes = v;
        }
        if let Some(v) = update.max_nodes {
            self.max_nodes = v;
        }
        if let Some(v) = update.cpu_cores_min {
            self.cpu_cores_min = v;
        }
        if let Some(v) = update.ram_gb_min {
            self.ram_gb_min = v;
        }
        if let Some(v) = update.gpu_required {
            self.gpu_required = v;
        }
        if let Some(v) = update.max_cpu_percent {
            self.max_cpu_percent = v;
        }
        if let Some(v) = update.max_mem_percent {
            self.max_mem_percent = v;
        }
        if let Some(v) = update.max_active_workloads {
            self.max_active_workloads = v;
        }
        if let Some(v) = update.priority {
            self.priority = v;
        }
        if let Some(v) = update.is_active {
            self.is_active = v;
        }
        self.updated_at = now;
    }
}

// ── Session ───────────────────────────────────────────────────────

/// A logical multi-node workload spanning one or more allocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: String,
    pub profile_id: ProfileId,
    pub status: SessionStatus,
    pub requested_nodes: u32,
    pub allocated_nodes: u32,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub stopped_at: Option<u64>,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(SessionStatus::Initializing),
            "running" => Ok(SessionStatus::Running),
            "stopping" => Ok(SessionStatus::Stopping),
            "stopped" => Ok(SessionStatus::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

// ── Allocation ────────────────────────────────────────────────────

/// Durable record that a node was assigned to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub id: AllocationId,
    pub session_id: SessionId,
    pub user_id: String,
    pub profile_id: ProfileId,
    pub hostname: Hostname,
    pub node_ip: String,
    pub status: AllocationStatus,
    pub container_id: Option<String>,
    pub port: Option<u16>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub stopped_at: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Lifecycle status of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    Running,
    Stopped,
    Failed,
}

impl AllocationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AllocationStatus::Stopped | AllocationStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Allocated => "allocated",
            AllocationStatus::Running => "running",
            AllocationStatus::Stopped => "stopped",
            AllocationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocated" => Ok(AllocationStatus::Allocated),
            "running" => Ok(AllocationStatus::Running),
            "stopped" => Ok(AllocationStatus::Stopped),
            "failed" => Ok(AllocationStatus::Failed),
            other => Err(format!("unknown allocation status: {other}")),
        }
    }
}

impl Allocation {
    /// Build the composite key for the allocations table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.session_id, self.id)
    }
}

impl NodeMetric {
    /// Build the composite key for the node metrics table.
    ///
    /// The timestamp is zero-padded so keys sort chronologically.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.hostname, self.recorded_at)
    }
}
