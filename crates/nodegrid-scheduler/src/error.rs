//! Scheduler error types.

use nodegrid_state::StateError;
use thiserror::Error;

/// Errors that can occur in profile and allocation operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("allocation not found: {0}")]
    AllocationNotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no suitable nodes available: {0}")]
    NoSuitableNodes(String),

    #[error("state store error: {0}")]
    Store(#[from] StateError),
}

impl SchedulerError {
    /// Lift a store error. A uniqueness violation is a caller mistake,
    /// not a store failure.
    pub(crate) fn from_write(err: StateError) -> Self {
        match err {
            StateError::Conflict(what) => SchedulerError::Validation(format!("{what} already exists")),
            other => SchedulerError::Store(other),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
