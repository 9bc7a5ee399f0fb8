//! nodegrid placement — node scoring, eligibility filters, and selection.
//!
//! This crate makes selection decisions over live node snapshots. It does
//! NOT persist anything or talk to nodes (that's `nodegrid-scheduler` and
//! `nodegrid-cluster`). It scores nodes and returns ranked picks that the
//! allocator turns into allocation records.
//!
//! # Components
//!
//! - **`scorer`** — Load score (weighted utilization + penalty bands)
//! - **`filter`** — Default / strict / profile eligibility filters
//! - **`selector`** — Ranking and best-fit / round-robin / random picks

pub mod filter;
pub mod scorer;
pub mod selector;

pub use filter::{NodeFilter, ProfileRequirements, within_thresholds};
pub use scorer::{LoadBand, ScoringWeights, score, score_utilization};
pub use selector::{CURSOR_MODULUS, ScoredNode, Selector, Strategy};
