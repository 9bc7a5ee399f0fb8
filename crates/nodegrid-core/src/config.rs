//! nodegrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodegridConfig {
    pub server: ServerConfig,
    pub liveness: LivenessConfig,
    pub scoring: ScoringConfig,
    pub filters: FiltersConfig,
    pub allocation: AllocationConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 15002,
            data_dir: PathBuf::from("/var/lib/nodegrid"),
        }
    }
}

/// How long an agent report keeps a node live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    /// Should be 2-3x the agent report interval.
    pub ttl_secs: u64,
    /// Number of lock shards in the in-memory liveness store.
    pub shards: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 45,
            shards: 16,
        }
    }
}

impl LivenessConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Load score weights and penalty bands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub heavy_threshold: f64,
    pub heavy_penalty: f64,
    pub medium_threshold: f64,
    pub medium_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cpu_weight: 0.5,
            memory_weight: 0.5,
            heavy_threshold: 90.0,
            heavy_penalty: 50.0,
            medium_threshold: 80.0,
            medium_penalty: 20.0,
        }
    }
}

/// Upper bounds (exclusive) a live node must stay under to be eligible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterThresholds {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_active_workloads: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FiltersConfig {
    pub default: FilterThresholds,
    pub strict: FilterThresholds,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            default: FilterThresholds {
                max_cpu_percent: 80.0,
                max_memory_percent: 85.0,
                max_active_workloads: None,
            },
            strict: FilterThresholds {
                max_cpu_percent: 60.0,
                max_memory_percent: 60.0,
                max_active_workloads: Some(5),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    /// Selection strategy used by `allocate`: "best_fit", "round_robin" or "random".
    pub strategy: String,
    /// Seed the default profile set at startup.
    pub seed_default_profiles: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            strategy: "best_fit".to_string(),
            seed_default_profiles: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub metrics_retention_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            metrics_retention_secs: 24 * 60 * 60,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn metrics_retention(&self) -> Duration {
        Duration::from_secs(self.metrics_retention_secs)
    }
}

impl NodegridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodegridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.liveness.ttl_secs == 0 {
            anyhow::bail!("liveness.ttl_secs must be greater than zero");
        }
        if self.liveness.shards == 0 {
            anyhow::bail!("liveness.shards must be greater than zero");
        }
        if self.scoring.cpu_weight < 0.0 || self.scoring.memory_weight < 0.0 {
            anyhow::bail!("scoring weights must not be negative");
        }
        if self.scoring.medium_threshold > self.scoring.heavy_threshold {
            anyhow::bail!("scoring.medium_threshold must not exceed scoring.heavy_threshold");
        }
        if self.scoring.medium_penalty < 0.0 || self.scoring.medium_penalty > self.scoring.heavy_penalty {
            anyhow::bail!("scoring.medium_penalty must be between 0 and scoring.heavy_penalty");
        }
        if self.sweeper.interval_secs == 0 {
            anyhow::bail!("sweeper.interval_secs must be greater than zero");
        }
        Ok(())
    }
}
