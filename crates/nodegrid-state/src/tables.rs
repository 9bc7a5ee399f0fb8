//! redb table definitions for the nodegrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{parent_id}:{child_id}`.

use redb::TableDefinition;

/// Profiles keyed by `{profile_id}`.
pub const PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");

/// Unique index: profile name → profile id.
pub const PROFILE_NAMES: TableDefinition<&str, &str> = TableDefinition::new("profile_names");

/// Sessions keyed by `{session_id}`.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Allocations keyed by `{session_id}:{allocation_id}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_allocations");

/// Index: allocation id → allocations table key.
pub const ALLOCATION_KEYS: TableDefinition<&str, &str> = TableDefinition::new("allocation_keys");

/// Durable node catalog keyed by `{hostname}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Node metric history keyed by `{hostname}:{recorded_at:020}`.
pub const NODE_METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_metrics");
