//! Liveness store — latest node snapshots with per-entry TTL.
//!
//! A node is live exactly while its most recent report is younger than the
//! TTL it was written with. Expiry is evaluated lazily on every read, so an
//! expired entry is invisible whether or not it has been purged yet.
//!
//! # Concurrency model
//!
//! [`MemoryLiveness`] splits its map into shards keyed by a hash of the
//! hostname. Each shard has its own `RwLock`, so reports from different
//! nodes rarely contend, and readers never block each other.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use nodegrid_state::NodeSnapshot;
use tracing::debug;

use crate::error::LivenessError;

/// Key/value store of live node snapshots.
pub trait LivenessStore: Send + Sync {
    /// Write the snapshot under its hostname, replacing any previous one
    /// and restarting its expiry clock.
    fn upsert(&self, snapshot: NodeSnapshot, ttl: Duration) -> Result<(), LivenessError>;

    /// Latest unexpired snapshot for `hostname`.
    fn get(&self, hostname: &str) -> Result<Option<NodeSnapshot>, LivenessError>;

    /// Every unexpired snapshot, in no particular order.
    fn list_live(&self) -> Result<Vec<NodeSnapshot>, LivenessError>;

    /// Remove a snapshot. Returns true if an unexpired one was present.
    fn delete(&self, hostname: &str) -> Result<bool, LivenessError>;

    /// Physically drop expired entries. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize, LivenessError>;
}

struct LiveEntry {
    snapshot: NodeSnapshot,
    inserted_at: Instant,
    ttl: Duration,
}

impl LiveEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

type Shard = RwLock<HashMap<String, LiveEntry>>;

/// In-process liveness store with hostname-sharded locks.
pub struct MemoryLiveness {
    shards: Vec<Shard>,
}

impl MemoryLiveness {
    /// Create a store with `shards` lock shards (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, hostname: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        hostname.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }
}

impl Default for MemoryLiveness {
    fn default() -> Self {
        Self::new(16)
    }
}

fn poisoned<T>(_: T) -> LivenessError {
    LivenessError::Lock("shard lock poisoned".to_string())
}

impl LivenessStore for MemoryLiveness {
    fn upsert(&self, snapshot: NodeSnapshot, ttl: Duration) -> Result<(), LivenessError> {
        let hostname = snapshot.hostname.clone();
        let entry = LiveEntry {
            snapshot,
            inserted_at: Instant::now(),
            ttl,
        };
        let mut shard = self.shard(&hostname).write().map_err(poisoned)?;
        shard.insert(hostname, entry);
        Ok(())
    }

    fn get(&self, hostname: &str) -> Result<Option<NodeSnapshot>, LivenessError> {
        let shard = self.shard(hostname).read().map_err(poisoned)?;
        Ok(shard
            .get(hostname)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.snapshot.clone()))
    }

    fn list_live(&self) -> Result<Vec<NodeSnapshot>, LivenessError> {
        let mut live = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().map_err(poisoned)?;
            live.extend(
                shard
                    .values()
                    .filter(|entry| !entry.is_expired())
                    .map(|entry| entry.snapshot.clone()),
            );
        }
        Ok(live)
    }

    fn delete(&self, hostname: &str) -> Result<bool, LivenessError> {
        let mut shard = self.shard(hostname).write().map_err(poisoned)?;
        Ok(shard
            .remove(hostname)
            .is_some_and(|entry| !entry.is_expired()))
    }

    fn purge_expired(&self) -> Result<usize, LivenessError> {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = shard.write().map_err(poisoned)?;
            let before = shard.len();
            shard.retain(|_, entry| !entry.is_expired());
            purged += before - shard.len();
        }
        if purged > 0 {
            debug!(purged, "expired liveness entries purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const LONG: Duration = Duration::from_secs(60);

    fn snap(hostname: &str, cpu: f64) -> NodeSnapshot {
        NodeSnapshot::new(hostname, "10.0.0.1", cpu, 10.0)
    }

    #[test]
    fn upsert_then_get() {
        let store = MemoryLiveness::default();
        store.upsert(snap("a", 10.0), LONG).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().cpu_percent, 10.0);
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_without_merge() {
        let store = MemoryLiveness::default();
        let mut first = snap("a", 10.0);
        first.has_gpu = true;
        store.upsert(first, LONG).unwrap();
        store.upsert(snap("a", 70.0), LONG).unwrap();

        let current = store.get("a").unwrap().unwrap();
        assert_eq!(current.cpu_percent, 70.0);
        assert!(!current.has_gpu);
        assert_eq!(store.list_live().unwrap().len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = MemoryLiveness::default();
        store.upsert(snap("short", 10.0), Duration::from_millis(20)).unwrap();
        store.upsert(snap("long", 10.0), LONG).unwrap();

        std::thread::sleep(Duration::from_millis(50));

        assert!(store.get("short").unwrap().is_none());
        let live = store.list_live().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].hostname, "long");
    }

    #[test]
    fn refresh_restarts_expiry_clock() {
        let store = MemoryLiveness::default();
        store.upsert(snap("a", 10.0), Duration::from_millis(80)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        store.upsert(snap("a", 20.0), Duration::from_millis(80)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(store.get("a").unwrap().is_some());
    }

    #[test]
    fn purge_drops_only_expired() {
        let store = MemoryLiveness::new(4);
        store.upsert(snap("gone", 10.0), Duration::ZERO).unwrap();
        store.upsert(snap("kept", 10.0), LONG).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
        assert!(store.get("kept").unwrap().is_some());
    }

    #[test]
    fn delete_reports_presence() {
        let store = MemoryLiveness::default();
        store.upsert(snap("a", 10.0), LONG).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.list_live().unwrap().is_empty());
    }

    #[test]
    fn single_shard_still_works() {
        let store = MemoryLiveness::new(0);
        for i in 0..10 {
            store.upsert(snap(&format!("n{i}"), 10.0), LONG).unwrap();
        }
        assert_eq!(store.list_live().unwrap().len(), 10);
    }

    #[test]
    fn concurrent_upserts_across_nodes() {
        let store = Arc::new(MemoryLiveness::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .upsert(snap(&format!("t{t}-n{}", i % 10), i as f64), LONG)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list_live().unwrap().len(), 80);
    }
}
