//! Node selection: filter, score, rank, pick.
//!
//! The round-robin cursor is the only shared mutable state here. It is
//! owned by a [`Selector`] instance (one per control plane) and advanced
//! with a lock-free compare-and-swap loop, so concurrent selections never
//! receive overlapping cursor ranges.

use std::sync::atomic::{AtomicU32, Ordering};

use nodegrid_core::FiltersConfig;
use nodegrid_state::NodeSnapshot;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::{NodeFilter, within_thresholds};
use crate::scorer::{ScoringWeights, score};

/// The cursor wraps back to zero at this value.
pub const CURSOR_MODULUS: u32 = 1_000_000;

/// How nodes are picked from the ranked eligible list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Lowest load score first.
    #[default]
    BestFit,
    /// Rotate through the ranked list across calls.
    RoundRobin,
    /// Uniformly random among eligible nodes.
    Random,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::BestFit => "best_fit",
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best_fit" => Ok(Strategy::BestFit),
            "round_robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            other => Err(format!("unknown selection strategy: {other}")),
        }
    }
}

/// A live node together with its computed load score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    #[serde(flatten)]
    pub node: NodeSnapshot,
    pub load_score: f64,
}

/// Filters, scores and picks nodes.
#[derive(Debug)]
pub struct Selector {
    cursor: AtomicU32,
    weights: ScoringWeights,
    filters: FiltersConfig,
}

impl Selector {
    pub fn new(weights: ScoringWeights, filters: FiltersConfig) -> Self {
        Self {
            cursor: AtomicU32::new(0),
            weights,
            filters,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Current round-robin cursor value (for diagnostics).
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Whether `node` passes `filter`.
    pub fn admits(&self, filter: &NodeFilter, node: &NodeSnapshot) -> bool {
        match filter {
            NodeFilter::Default => within_thresholds(node, &self.filters.default),
            NodeFilter::Strict => within_thresholds(node, &self.filters.strict),
            NodeFilter::Profile(req) => req.admits(node),
            NodeFilter::Any => true,
        }
    }

    /// Score a single node with this selector's weights.
    pub fn score(&self, node: &NodeSnapshot) -> f64 {
        score(node, &self.weights)
    }

    /// All eligible nodes, sorted ascending by score with hostname as tie-break.
    pub fn rank(&self, nodes: &[NodeSnapshot], filter: &NodeFilter) -> Vec<ScoredNode> {
        let mut ranked: Vec<ScoredNode> = nodes
            .iter()
            .filter(|node| self.admits(filter, node))
            .map(|node| ScoredNode {
                load_score: self.score(node),
                node: node.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.load_score
                .total_cmp(&b.load_score)
                .then_with(|| a.node.hostname.cmp(&b.node.hostname))
        });
        ranked
    }

    /// Pick up to `count` distinct eligible nodes.
    ///
    /// Returns fewer than `count` when fewer are eligible; never pads.
    pub fn select(
        &self,
        nodes: &[NodeSnapshot],
        filter: &NodeFilter,
        count: usize,
        strategy: Strategy,
    ) -> Vec<ScoredNode> {
        let mut ranked = self.rank(nodes, filter);
        let take = count.min(ranked.len());
        if take == 0 {
            debug!(eligible = ranked.len(), count, "no nodes selected");
            return Vec::new();
        }

        let picked = match strategy {
            Strategy::BestFit => {
                ranked.truncate(take);
                ranked
            }
            Strategy::RoundRobin => {
                let start = self.reserve(take as u32) as usize;
                let len = ranked.len();
                (0..take)
                    .map(|i| ranked[(start + i) % len].clone())
                    .collect()
            }
            Strategy::Random => {
                let mut rng = rand::thread_rng();
                ranked.shuffle(&mut rng);
                ranked.truncate(take);
                ranked
            }
        };

        debug!(
            strategy = strategy.as_str(),
            requested = count,
            selected = picked.len(),
            "nodes selected"
        );
        picked
    }

    /// Atomically advance the cursor by `count`, returning its prior value.
    fn reserve(&self, count: u32) -> u32 {
        let step = count % CURSOR_MODULUS;
        let advance = |current: u32| Some(((current as u64 + step as u64) % CURSOR_MODULUS as u64) as u32);
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, advance)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), FiltersConfig::default())
    }
}
