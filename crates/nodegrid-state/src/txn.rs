//! Typed access to a single redb write transaction.
//!
//! `StoreTxn` is handed to the closure passed to [`StateStore::write`].
//! Every read it performs sees the transaction's own uncommitted writes,
//! and nothing it writes is visible to other callers until commit.
//!
//! [`StateStore::write`]: crate::StateStore::write

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

pub(crate) type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Write-transaction view over the nodegrid tables.
pub struct StoreTxn<'a> {
    txn: &'a WriteTransaction,
}

impl<'a> StoreTxn<'a> {
    pub(crate) fn new(txn: &'a WriteTransaction) -> Self {
        Self { txn }
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn profile_exists(&self, profile_id: &str) -> StateResult<bool> {
        let table = self.txn.open_table(PROFILES).map_err(map_err!(Table))?;
        let exists = table.get(profile_id).map_err(map_err!(Read))?.is_some();
        Ok(exists)
    }

    fn name_owner(&self, name: &str) -> StateResult<Option<String>> {
        let table = self.txn.open_table(PROFILE_NAMES).map_err(map_err!(Table))?;
        let owner = table
            .get(name)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        Ok(owner)
    }

    // ── Profiles ───────────────────────────────────────────────────

    /// Get a profile by ID.
    pub fn get_profile(&self, profile_id: &str) -> StateResult<Option<Profile>> {
        self.get_json(PROFILES, profile_id)
    }

    /// Insert a new profile, claiming its name in the unique index.
    ///
    /// Fails with `Conflict` if another profile (active or not) holds the name.
    pub fn insert_profile(&self, profile: &Profile) -> StateResult<()> {
        if self.name_owner(&profile.name)?.is_some() {
            return Err(StateError::Conflict(format!("profile name '{}'", profile.name)));
        }
        if self.profile_exists(&profile.id)? {
            return Err(StateError::Conflict(format!("profile id '{}'", profile.id)));
        }
        self.put_json(PROFILES, &profile.id, profile)?;
        let mut names = self.txn.open_table(PROFILE_NAMES).map_err(map_err!(Table))?;
        names
            .insert(profile.name.as_str(), profile.id.as_str())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Replace an existing profile, moving its name index entry if renamed.
    pub fn update_profile(&self, profile: &Profile) -> StateResult<()> {
        let previous: Profile = self
            .get_profile(&profile.id)?
            .ok_or_else(|| StateError::NotFound(format!("profile {}", profile.id)))?;

        if previous.name != profile.name {
            if let Some(owner) = self.name_owner(&profile.name)? {
                if owner != profile.id {
                    return Err(StateError::Conflict(format!("profile name '{}'", profile.name)));
                }
            }
            let mut names = self.txn.open_table(PROFILE_NAMES).map_err(map_err!(Table))?;
            names
                .remove(previous.name.as_str())
                .map_err(map_err!(Write))?;
            names
                .insert(profile.name.as_str(), profile.id.as_str())
                .map_err(map_err!(Write))?;
        }

        self.put_json(PROFILES, &profile.id, profile)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Get a session by its client-supplied ID.
    pub fn get_session(&self, session_id: &str) -> StateResult<Option<Session>> {
        self.get_json(SESSIONS, session_id)
    }

    /// Insert or replace a session. Its profile must exist.
    pub fn put_session(&self, session: &Session) -> StateResult<()> {
        if !self.profile_exists(&session.profile_id)? {
            return Err(StateError::ForeignKey(format!(
                "session {} references missing profile {}",
                session.session_id, session.profile_id
            )));
        }
        self.put_json(SESSIONS, &session.session_id, session)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Get an allocation by ID.
    pub fn get_allocation(&self, allocation_id: &str) -> StateResult<Option<Allocation>> {
        let key = {
            let index = self.txn.open_table(ALLOCATION_KEYS).map_err(map_err!(Table))?;
            index
                .get(allocation_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string())
        };
        match key {
            Some(key) => self.get_json(ALLOCATIONS, &key),
            None => Ok(None),
        }
    }

    /// All allocations (any status) belonging to a session.
    pub fn session_allocations(&self, session_id: &str) -> StateResult<Vec<Allocation>> {
        let prefix = format!("{session_id}:");
        let table = self.txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let allocation: Allocation =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if allocation.session_id == session_id {
                    results.push(allocation);
                }
            }
        }
        Ok(results)
    }

    /// Insert or replace an allocation. Its session and profile must exist.
    pub fn put_allocation(&self, allocation: &Allocation) -> StateResult<()> {
        if !self.profile_exists(&allocation.profile_id)? {
            return Err(StateError::ForeignKey(format!(
                "allocation {} references missing profile {}",
                allocation.id, allocation.profile_id
            )));
        }
        if self.get_session(&allocation.session_id)?.is_none() {
            return Err(StateError::ForeignKey(format!(
                "allocation {} references missing session {}",
                allocation.id, allocation.session_id
            )));
        }
        let key = allocation.table_key();
        self.put_json(ALLOCATIONS, &key, allocation)?;
        let mut index = self.txn.open_table(ALLOCATION_KEYS).map_err(map_err!(Table))?;
        index
            .insert(allocation.id.as_str(), key.as_str())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Get a node record by hostname.
    pub fn get_node(&self, hostname: &str) -> StateResult<Option<NodeRecord>> {
        self.get_json(NODES, hostname)
    }

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        self.put_json(NODES, &node.hostname, node)
    }

    /// Append a metric sample.
    pub fn put_node_metric(&self, metric: &NodeMetric) -> StateResult<()> {
        self.put_json(NODE_METRICS, &metric.table_key(), metric)
    }
}
