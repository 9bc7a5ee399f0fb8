//! StateStore — redb-backed state persistence for nodegrid.
//!
//! Provides typed reads over profiles, sessions, allocations, the node
//! catalog and node metric history, plus [`StateStore::write`] for
//! multi-row transactional writes. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::txn::{JsonTable, StoreTxn};
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROFILES).map_err(map_err!(Table))?;
        txn.open_table(PROFILE_NAMES).map_err(map_err!(Table))?;
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATION_KEYS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(NODE_METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits if `f` returns `Ok`; aborts (leaving no trace of any write
    /// `f` made) if it returns `Err`. Writers are serialized by redb, so
    /// check-then-write sequences inside `f` are atomic.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTxn<'_>) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| E::from(StateError::Transaction(e.to_string())))?;
        match f(&StoreTxn::new(&txn)) {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "write transaction abort failed");
                }
                Err(e)
            }
        }
    }

    fn read_one<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Deserialize every row whose key starts with `prefix` (all rows if empty).
    fn scan<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    // ── Profiles ───────────────────────────────────────────────────

    /// Insert a new profile. Fails with `Conflict` on a duplicate name.
    pub fn insert_profile(&self, profile: &Profile) -> StateResult<()> {
        self.write(|tx| tx.insert_profile(profile))?;
        debug!(profile_id = %profile.id, name = %profile.name, "profile stored");
        Ok(())
    }

    /// Replace an existing profile.
    pub fn update_profile(&self, profile: &Profile) -> StateResult<()> {
        self.write(|tx| tx.update_profile(profile))?;
        debug!(profile_id = %profile.id, "profile updated");
        Ok(())
    }

    /// Get a profile by ID.
    pub fn get_profile(&self, profile_id: &str) -> StateResult<Option<Profile>> {
        self.read_one(PROFILES, profile_id)
    }

    /// Get a profile by its unique name.
    pub fn get_profile_by_name(&self, name: &str) -> StateResult<Option<Profile>> {
        let profile_id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let names = txn.open_table(PROFILE_NAMES).map_err(map_err!(Table))?;
            let owner = names
                .get(name)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            owner
        };
        match profile_id {
            Some(id) => self.get_profile(&id),
            None => Ok(None),
        }
    }

    /// List all profiles, active or not.
    pub fn list_profiles(&self) -> StateResult<Vec<Profile>> {
        self.scan(PROFILES, "")
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Get a session by ID.
    pub fn get_session(&self, session_id: &str) -> StateResult<Option<Session>> {
        self.read_one(SESSIONS, session_id)
    }

    /// List all sessions.
    pub fn list_sessions(&self) -> StateResult<Vec<Session>> {
        self.scan(SESSIONS, "")
    }

    // ── Allocations ────────────────────────────────────────────────

    /// List all allocations for a given session ID.
    pub fn list_allocations_for_session(&self, session_id: &str) -> StateResult<Vec<Allocation>> {
        let prefix = format!("{session_id}:");
        let allocations: Vec<Allocation> = self.scan(ALLOCATIONS, &prefix)?;
        Ok(allocations
            .into_iter()
            .filter(|a| a.session_id == session_id)
            .collect())
    }

    /// Get an allocation by ID.
    pub fn get_allocation(&self, allocation_id: &str) -> StateResult<Option<Allocation>> {
        let key = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let index = txn.open_table(ALLOCATION_KEYS).map_err(map_err!(Table))?;
            let key = index
                .get(allocation_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            key
        };
        match key {
            Some(key) => self.read_one(ALLOCATIONS, &key),
            None => Ok(None),
        }
    }

    /// List every allocation.
    pub fn list_allocations(&self) -> StateResult<Vec<Allocation>> {
        self.scan(ALLOCATIONS, "")
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        self.write(|tx| tx.put_node(node))
    }

    /// Get a node by hostname.
    pub fn get_node(&self, hostname: &str) -> StateResult<Option<NodeRecord>> {
        self.read_one(NODES, hostname)
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        self.scan(NODES, "")
    }

    /// Clear the `is_active` flag of one node in its own transaction.
    ///
    /// Returns true if the flag was flipped.
    pub fn deactivate_node(&self, hostname: &str) -> StateResult<bool> {
        self.write(|tx| {
            let Some(mut node) = tx.get_node(hostname)? else {
                return Err(StateError::NotFound(format!("node {hostname}")));
            };
            if !node.is_active {
                return Ok(false);
            }
            node.is_active = false;
            tx.put_node(&node)?;
            Ok(true)
        })
    }

    // ── Node metrics ───────────────────────────────────────────────

    /// Append a metric sample.
    pub fn put_node_metric(&self, metric: &NodeMetric) -> StateResult<()> {
        self.write(|tx| tx.put_node_metric(metric))
    }

    /// Metric samples for a node recorded at or after `since`, newest first.
    pub fn list_node_metrics(&self, hostname: &str, since: u64) -> StateResult<Vec<NodeMetric>> {
        let prefix = format!("{hostname}:");
        let mut metrics: Vec<NodeMetric> = self.scan(NODE_METRICS, &prefix)?;
        metrics.retain(|m| m.hostname == hostname && m.recorded_at >= since);
        metrics.reverse();
        Ok(metrics)
    }

    /// Delete all metric samples recorded before `cutoff`. Returns number deleted.
    pub fn prune_node_metrics(&self, cutoff: u64) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(NODE_METRICS).map_err(map_err!(Table))?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let metric: NodeMetric =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if metric.recorded_at < cutoff {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = stale.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, cutoff, "node metrics pruned");
        Ok(count)
    }
}
