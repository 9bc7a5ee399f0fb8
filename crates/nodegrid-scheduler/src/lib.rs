//! nodegrid-scheduler — profile catalog and node allocation.
//!
//! Maps allocation requests (session + profile) onto live nodes chosen by
//! the `nodegrid-placement` selector, and persists the result. The
//! scheduler:
//!
//! - Manages resource profiles (create, update, soft delete, seed defaults)
//! - Allocates nodes to sessions, clamped to the profile's node bounds
//! - Tracks allocation status reported by the launcher
//! - Releases every allocation of a session on deallocate
//!
//! # Architecture
//!
//! ```text
//! ProfileCatalog ── StateStore (profiles, unique names)
//! Allocator
//!   ├── StateStore (sessions + allocations, one transaction per call)
//!   └── Selector   (profile filter, best-fit / round-robin / random)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

pub mod allocator;
pub mod catalog;
pub mod error;

pub use allocator::{
    AllocationFilter, AllocationOutcome, AllocationRequest, Allocator, Deallocation,
    SessionFilter, Shortfall, StatusUpdate,
};
pub use catalog::{ProfileCatalog, default_profiles};
pub use error::{SchedulerError, SchedulerResult};

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
