//! Eligibility filters applied to live nodes before scoring.

use nodegrid_core::FilterThresholds;
use nodegrid_state::{NodeSnapshot, Profile};
use serde::{Deserialize, Serialize};

/// Hardware floors and health ceilings taken from a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRequirements {
    pub cpu_cores_min: u32,
    pub ram_gb_min: f64,
    pub gpu_required: bool,
    pub max_cpu_percent: f64,
    pub max_mem_percent: f64,
    pub max_active_workloads: u32,
}

impl From<&Profile> for ProfileRequirements {
    fn from(profile: &Profile) -> Self {
        Self {
            cpu_cores_min: profile.cpu_cores_min,
            ram_gb_min: profile.ram_gb_min,
            gpu_required: profile.gpu_required,
            max_cpu_percent: profile.max_cpu_percent,
            max_mem_percent: profile.max_mem_percent,
            max_active_workloads: profile.max_active_workloads,
        }
    }
}

impl ProfileRequirements {
    pub fn admits(&self, node: &NodeSnapshot) -> bool {
        node.cpu_cores >= self.cpu_cores_min
            && node.ram_gb >= self.ram_gb_min
            && (!self.gpu_required || node.has_gpu)
            && node.cpu_percent < self.max_cpu_percent
            && node.mem_percent < self.max_mem_percent
            && node.workloads.active() < self.max_active_workloads
    }
}

/// Which nodes are eligible for selection.
///
/// `Default` and `Strict` resolve to the thresholds configured on the
/// [`Selector`](crate::Selector); `Profile` carries its own.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFilter {
    Default,
    Strict,
    Profile(ProfileRequirements),
    Any,
}

impl std::str::FromStr for NodeFilter {
    type Err = String;

    /// Parse the named filters accepted on the wire. Profile filters are
    /// built from a stored profile, never parsed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(NodeFilter::Default),
            "strict" => Ok(NodeFilter::Strict),
            "any" | "none" => Ok(NodeFilter::Any),
            other => Err(format!("unknown node filter: {other}")),
        }
    }
}

/// Whether a node stays strictly under a set of configured thresholds.
pub fn within_thresholds(node: &NodeSnapshot, thresholds: &FilterThresholds) -> bool {
    node.cpu_percent < thresholds.max_cpu_percent
        && node.mem_percent < thresholds.max_memory_percent
        && thresholds
            .max_active_workloads
            .is_none_or(|max| node.workloads.active() < max)
}
