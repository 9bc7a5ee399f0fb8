//! Cluster error types.

use thiserror::Error;

/// Failures of the liveness backend.
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("liveness store unavailable: {0}")]
    Unavailable(String),

    #[error("liveness shard lock poisoned: {0}")]
    Lock(String),
}

/// Errors that can occur in node registry and query operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Liveness(#[from] LivenessError),

    #[error("state store error: {0}")]
    Store(#[from] nodegrid_state::StateError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
