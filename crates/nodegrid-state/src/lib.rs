//! nodegrid-state — durable state store for nodegrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for profiles, sessions, allocations, the node catalog,
//! and node metric history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{session_id}:{allocation_id}`, `{hostname}:{epoch}`)
//! enable prefix scans for related records.
//!
//! Multi-row operations go through [`StateStore::write`], which runs a
//! closure against a single redb write transaction: the closure's writes
//! commit together or not at all. Integrity rules that must hold under
//! concurrency (unique profile names, profile foreign keys) are checked
//! inside that transaction, so they cannot race.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod error;
pub mod store;
pub mod tables;
pub mod txn;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use txn::StoreTxn;
pub use types::*;
