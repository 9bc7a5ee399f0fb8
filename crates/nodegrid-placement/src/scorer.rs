//! Node load scoring.
//!
//! Collapses a node's CPU and memory utilization into a single load score
//! where **lower is better**:
//! - **Weighted utilization**: `cpu * cpu_weight + mem * memory_weight`
//! - **Penalty bands**: a fixed penalty when either resource crosses the
//!   medium or heavy threshold (never both)

use nodegrid_core::ScoringConfig;
use nodegrid_state::NodeSnapshot;
use serde::{Deserialize, Serialize};

/// Weights and penalty bands for the load score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    pub cpu: f64,
    pub memory: f64,
    pub heavy_threshold: f64,
    pub heavy_penalty: f64,
    pub medium_threshold: f64,
    pub medium_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringWeights {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            cpu: config.cpu_weight,
            memory: config.memory_weight,
            heavy_threshold: config.heavy_threshold,
            heavy_penalty: config.heavy_penalty,
            medium_threshold: config.medium_threshold,
            medium_penalty: config.medium_penalty,
        }
    }
}

/// Which penalty band a node's utilization falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBand {
    Normal,
    Medium,
    Heavy,
}

impl ScoringWeights {
    /// Classify raw utilization into a penalty band.
    pub fn band(&self, cpu_percent: f64, mem_percent: f64) -> LoadBand {
        if cpu_percent > self.heavy_threshold || mem_percent > self.heavy_threshold {
            LoadBand::Heavy
        } else if cpu_percent > self.medium_threshold || mem_percent > self.medium_threshold {
            LoadBand::Medium
        } else {
            LoadBand::Normal
        }
    }

    fn penalty(&self, band: LoadBand) -> f64 {
        match band {
            LoadBand::Normal => 0.0,
            LoadBand::Medium => self.medium_penalty,
            LoadBand::Heavy => self.heavy_penalty,
        }
    }
}

/// Score raw utilization figures, rounded to two decimals.
pub fn score_utilization(cpu_percent: f64, mem_percent: f64, weights: &ScoringWeights) -> f64 {
    let base = cpu_percent * weights.cpu + mem_percent * weights.memory;
    let total = base + weights.penalty(weights.band(cpu_percent, mem_percent));
    (total * 100.0).round() / 100.0
}

/// Score a node snapshot. Lower is better.
pub fn score(snapshot: &NodeSnapshot, weights: &ScoringWeights) -> f64 {
    score_utilization(snapshot.cpu_percent, snapshot.mem_percent, weights)
}
