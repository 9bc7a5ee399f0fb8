//! Allocation manager — turns profile requests into durable allocations.
//!
//! Every mutating operation runs in exactly one state store write
//! transaction: either the session row and all of its allocation rows are
//! committed together, or nothing is.
//!
//! # Lifecycle
//!
//! ```text
//! allocate ──▶ session: initializing    allocations: allocated
//! status(running) ──▶ session: running  allocation: running (+started_at)
//! status(stopped|failed) on the last live allocation ──▶ session: stopped
//! deallocate ──▶ every non-terminal allocation: stopped, session: stopped
//! ```

use std::sync::Arc;

use nodegrid_placement::{NodeFilter, ProfileRequirements, Selector, Strategy};
use nodegrid_state::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::epoch_secs;
use crate::error::{SchedulerError, SchedulerResult};

/// A request for nodes on behalf of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub session_id: SessionId,
    pub user_id: String,
    pub profile_id: ProfileId,
    /// Desired node count; clamped to the profile's bounds.
    #[serde(default)]
    pub node_count: Option<u32>,
}

/// Fewer nodes were eligible than the request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub requested: u32,
    pub allocated: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub session: Session,
    pub allocations: Vec<Allocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Shortfall>,
    /// True when an existing active session was returned unchanged.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deallocation {
    pub session: Session,
    /// Allocations moved to `stopped` by this call.
    pub released: Vec<Allocation>,
}

/// Launcher-reported progress of one allocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub user_id: Option<String>,
    pub profile_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationFilter {
    pub status: Option<AllocationStatus>,
    pub user_id: Option<String>,
    pub profile_id: Option<String>,
    pub session_id: Option<String>,
    pub hostname: Option<String>,
}

/// Allocates, releases and tracks nodes for sessions.
#[derive(Clone)]
pub struct Allocator {
    state: StateStore,
    selector: Arc<Selector>,
    strategy: Strategy,
}

impl Allocator {
    /// Create an allocator using the best-fit strategy.
    pub fn new(state: StateStore, selector: Arc<Selector>) -> Self {
        Self {
            state,
            selector,
            strategy: Strategy::BestFit,
        }
    }

    /// Set the selection strategy used by `allocate`.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Allocate nodes from `live` to a session.
    ///
    /// Idempotent while the session is active: a repeated request returns
    /// the session's current allocations without selecting again.
    pub fn allocate(&self, request: AllocationRequest, live: &[NodeSnapshot]) -> SchedulerResult<AllocationOutcome> {
        if request.session_id.trim().is_empty() {
            return Err(SchedulerError::Validation("session_id must not be empty".to_string()));
        }
        if request.user_id.trim().is_empty() {
            return Err(SchedulerError::Validation("user_id must not be empty".to_string()));
        }

        let profile = self
            .state
            .get_profile(&request.profile_id)?
            .filter(|p| p.is_active)
            .ok_or_else(|| SchedulerError::ProfileNotFound(request.profile_id.clone()))?;

        if let Some(outcome) = self.existing(&request.session_id)? {
            debug!(session_id = %request.session_id, "session already allocated");
            return Ok(outcome);
        }

        let desired = profile.node_count(request.node_count);
        let filter = NodeFilter::Profile(ProfileRequirements::from(&profile));
        let selected = self
            .selector
            .select(live, &filter, desired as usize, self.strategy);

        if selected.is_empty() {
            warn!(
                session_id = %request.session_id,
                profile = %profile.name,
                live = live.len(),
                "no suitable nodes for allocation"
            );
            return Err(SchedulerError::NoSuitableNodes(format!(
                "no live node satisfies profile '{}'",
                profile.name
            )));
        }

        let now = epoch_secs();
        let session = Session {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            profile_id: profile.id.clone(),
            status: SessionStatus::Initializing,
            requested_nodes: desired,
            allocated_nodes: selected.len() as u32,
            created_at: now,
            started_at: None,
            stopped_at: None,
        };
        let allocations: Vec<Allocation> = selected
            .iter()
            .map(|picked| Allocation {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session.session_id.clone(),
                user_id: session.user_id.clone(),
                profile_id: profile.id.clone(),
                hostname: picked.node.hostname.clone(),
                node_ip: picked.node.ip.clone(),
                status: AllocationStatus::Allocated,
                container_id: None,
                port: None,
                created_at: now,
                started_at: None,
                stopped_at: None,
                metadata: serde_json::Value::Null,
            })
            .collect();

        let outcome = self.state.write(|tx| {
            // Re-check under the writer lock; a concurrent request may have won.
            if let Some(outcome) = active_outcome(tx, &session.session_id)? {
                return Ok::<_, SchedulerError>(outcome);
            }
            tx.put_session(&session)?;
            for allocation in &allocations {
                tx.put_allocation(allocation)?;
            }
            let shortfall = (session.allocated_nodes < desired).then_some(Shortfall {
                requested: desired,
                allocated: session.allocated_nodes,
            });
            Ok(AllocationOutcome {
                session: session.clone(),
                allocations: allocations.clone(),
                shortfall,
                reused: false,
            })
        })?;

        if outcome.reused {
            debug!(session_id = %session.session_id, "concurrent allocation won, returning it");
        } else if let Some(shortfall) = outcome.shortfall {
            warn!(
                session_id = %session.session_id,
                requested = shortfall.requested,
                allocated = shortfall.allocated,
                "partial allocation"
            );
        } else {
            info!(
                session_id = %session.session_id,
                user_id = %session.user_id,
                profile = %profile.name,
                nodes = outcome.allocations.len(),
                "session allocated"
            );
        }
        Ok(outcome)
    }

    fn existing(&self, session_id: &str) -> SchedulerResult<Option<AllocationOutcome>> {
        match self.state.get_session(session_id)? {
            Some(session) if !session.status.is_terminal() => {
                let allocations = self
                    .state
                    .list_allocations_for_session(session_id)?
                    .into_iter()
                    .filter(|a| !a.status.is_terminal())
                    .collect();
                Ok(Some(AllocationOutcome {
                    session,
                    allocations,
                    shortfall: None,
                    reused: true,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Stop every live allocation of a session and the session itself.
    pub fn deallocate(&self, session_id: &str) -> SchedulerResult<Deallocation> {
        let result = self.state.write(|tx| {
            let mut session = tx
                .get_session(session_id)?
                .ok_or_else(|| SchedulerError::SessionNotFound(session_id.to_string()))?;
            let now = epoch_secs();

            let mut released = Vec::new();
            for mut allocation in tx.session_allocations(session_id)? {
                if allocation.status.is_terminal() {
                    continue;
                }
                allocation.status = AllocationStatus::Stopped;
                allocation.stopped_at = Some(now);
                tx.put_allocation(&allocation)?;
                released.push(allocation);
            }

            if !session.status.is_terminal() {
                session.status = SessionStatus::Stopped;
                session.stopped_at = Some(now);
                tx.put_session(&session)?;
            }
            Ok::<_, SchedulerError>(Deallocation { session, released })
        })?;

        info!(%session_id, released = result.released.len(), "session deallocated");
        Ok(result)
    }

    /// Record launcher progress for one allocation and reconcile its session.
    pub fn update_allocation_status(&self, allocation_id: &str, update: StatusUpdate) -> SchedulerResult<Allocation> {
        let status: AllocationStatus = update.status.parse().map_err(SchedulerError::Validation)?;

        let allocation = self.state.write(|tx| {
            let mut allocation = tx
                .get_allocation(allocation_id)?
                .ok_or_else(|| SchedulerError::AllocationNotFound(allocation_id.to_string()))?;

            if allocation.status.is_terminal() && allocation.status != status {
                return Err(SchedulerError::Validation(format!(
                    "allocation {allocation_id} is already {}",
                    allocation.status.as_str()
                )));
            }

            let now = epoch_secs();
            allocation.status = status;
            if status == AllocationStatus::Running && allocation.started_at.is_none() {
                allocation.started_at = Some(now);
            }
            if status.is_terminal() && allocation.stopped_at.is_none() {
                allocation.stopped_at = Some(now);
            }
            if let Some(container_id) = update.container_id {
                allocation.container_id = Some(container_id);
            }
            if let Some(port) = update.port {
                allocation.port = Some(port);
            }
            if let Some(metadata) = update.metadata {
                merge_metadata(&mut allocation.metadata, metadata);
            }
            tx.put_allocation(&allocation)?;

            reconcile_session(tx, &allocation.session_id, now)?;
            Ok::<_, SchedulerError>(allocation)
        })?;

        debug!(
            %allocation_id,
            session_id = %allocation.session_id,
            status = allocation.status.as_str(),
            "allocation status updated"
        );
        Ok(allocation)
    }

    pub fn get_allocation(&self, allocation_id: &str) -> SchedulerResult<Allocation> {
        self.state
            .get_allocation(allocation_id)?
            .ok_or_else(|| SchedulerError::AllocationNotFound(allocation_id.to_string()))
    }

    /// All allocations (including historical ones) of a session, newest first.
    pub fn session_allocations(&self, session_id: &str) -> SchedulerResult<Vec<Allocation>> {
        if self.state.get_session(session_id)?.is_none() {
            return Err(SchedulerError::SessionNotFound(session_id.to_string()));
        }
        let mut allocations = self.state.list_allocations_for_session(session_id)?;
        newest_first(&mut allocations, |a| (a.created_at, a.id.as_str()));
        Ok(allocations)
    }

    /// Sessions matching `filter`, newest first.
    pub fn list_sessions(&self, filter: &SessionFilter) -> SchedulerResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .state
            .list_sessions()?
            .into_iter()
            .filter(|s| filter.status.is_none_or(|st| s.status == st))
            .filter(|s| matches_opt(&filter.user_id, &s.user_id))
            .filter(|s| matches_opt(&filter.profile_id, &s.profile_id))
            .collect();
        newest_first(&mut sessions, |s| (s.created_at, s.session_id.as_str()));
        Ok(sessions)
    }

    /// Allocations matching `filter`, newest first.
    pub fn list_allocations(&self, filter: &AllocationFilter) -> SchedulerResult<Vec<Allocation>> {
        let mut allocations: Vec<Allocation> = self
            .state
            .list_allocations()?
            .into_iter()
            .filter(|a| filter.status.is_none_or(|st| a.status == st))
            .filter(|a| matches_opt(&filter.user_id, &a.user_id))
            .filter(|a| matches_opt(&filter.profile_id, &a.profile_id))
            .filter(|a| matches_opt(&filter.session_id, &a.session_id))
            .filter(|a| matches_opt(&filter.hostname, &a.hostname))
            .collect();
        newest_first(&mut allocations, |a| (a.created_at, a.id.as_str()));
        Ok(allocations)
    }
}

fn active_outcome(tx: &StoreTxn<'_>, session_id: &str) -> SchedulerResult<Option<AllocationOutcome>> {
    match tx.get_session(session_id)? {
        Some(session) if !session.status.is_terminal() => {
            let allocations = tx
                .session_allocations(session_id)?
                .into_iter()
                .filter(|a| !a.status.is_terminal())
                .collect();
            Ok(Some(AllocationOutcome {
                session,
                allocations,
                shortfall: None,
                reused: true,
            }))
        }
        _ => Ok(None),
    }
}

/// Derive the session status from its allocations.
fn reconcile_session(tx: &StoreTxn<'_>, session_id: &str, now: u64) -> SchedulerResult<()> {
    let Some(mut session) = tx.get_session(session_id)? else {
        return Ok(());
    };
    if session.status.is_terminal() {
        return Ok(());
    }

    let allocations = tx.session_allocations(session_id)?;
    let before = session.status;
    if allocations.iter().all(|a| a.status.is_terminal()) {
        session.status = SessionStatus::Stopped;
        session.stopped_at = Some(now);
    } else if session.status == SessionStatus::Initializing
        && allocations.iter().any(|a| a.status == AllocationStatus::Running)
    {
        session.status = SessionStatus::Running;
        session.started_at = Some(now);
    }

    if session.status != before {
        tx.put_session(&session)?;
        debug!(%session_id, from = before.as_str(), to = session.status.as_str(), "session status changed");
    }
    Ok(())
}

/// Merge object metadata key by key; anything else replaces the old value.
fn merge_metadata(current: &mut serde_json::Value, incoming: serde_json::Value) {
    match (current, incoming) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (current, incoming) => *current = incoming,
    }
}

fn matches_opt(wanted: &Option<String>, actual: &str) -> bool {
    wanted.as_deref().is_none_or(|w| w == actual)
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (u64, &str),
{
    items.sort_by(|a, b| {
        let (ta, ia) = key(a);
        let (tb, ib) = key(b);
        tb.cmp(&ta).then_with(|| ia.cmp(ib))
    });
}
