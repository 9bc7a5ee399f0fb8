//! Profile catalog — named resource templates for allocations.
//!
//! Profiles are never hard-deleted: sessions and allocations keep
//! referencing them after they are retired. Name uniqueness is checked
//! by the state store inside the write transaction, so two concurrent
//! creates with the same name cannot both succeed.

use std::sync::Arc;

use nodegrid_placement::{NodeFilter, ProfileRequirements, ScoredNode, Selector};
use nodegrid_state::*;
use tracing::{debug, info};

use crate::epoch_secs;
use crate::error::{SchedulerError, SchedulerResult};

/// CRUD and node compatibility over stored profiles.
#[derive(Clone)]
pub struct ProfileCatalog {
    state: StateStore,
    selector: Arc<Selector>,
}

impl ProfileCatalog {
    pub fn new(state: StateStore, selector: Arc<Selector>) -> Self {
        Self { state, selector }
    }

    /// Create a new active profile.
    pub fn create(&self, spec: ProfileSpec) -> SchedulerResult<Profile> {
        let profile = Profile::from_spec(uuid::Uuid::new_v4().to_string(), spec, epoch_secs());
        validate(&profile)?;
        self.state
            .write(|tx| tx.insert_profile(&profile))
            .map_err(SchedulerError::from_write)?;
        info!(profile_id = %profile.id, name = %profile.name, "profile created");
        Ok(profile)
    }

    /// Apply a partial update. The result is validated before it is written.
    pub fn update(&self, profile_id: &str, update: ProfileUpdate) -> SchedulerResult<Profile> {
        let profile = self.state.write(|tx| {
            let mut profile = tx
                .get_profile(profile_id)?
                .ok_or_else(|| SchedulerError::ProfileNotFound(profile_id.to_string()))?;
            profile.apply(update, epoch_secs());
            validate(&profile)?;
            tx.update_profile(&profile).map_err(SchedulerError::from_write)?;
            Ok::<_, SchedulerError>(profile)
        })?;
        debug!(%profile_id, "profile updated");
        Ok(profile)
    }

    /// Retire a profile. It stays readable but can no longer be allocated.
    pub fn delete(&self, profile_id: &str) -> SchedulerResult<Profile> {
        let profile = self.update(
            profile_id,
            ProfileUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )?;
        info!(%profile_id, name = %profile.name, "profile deactivated");
        Ok(profile)
    }

    pub fn get(&self, profile_id: &str) -> SchedulerResult<Profile> {
        self.state
            .get_profile(profile_id)?
            .ok_or_else(|| SchedulerError::ProfileNotFound(profile_id.to_string()))
    }

    pub fn get_by_name(&self, name: &str) -> SchedulerResult<Profile> {
        self.state
            .get_profile_by_name(name)?
            .ok_or_else(|| SchedulerError::ProfileNotFound(name.to_string()))
    }

    /// Profiles ordered by priority (highest first), then name.
    pub fn list(&self, active_only: bool) -> SchedulerResult<Vec<Profile>> {
        let mut profiles = self.state.list_profiles()?;
        if active_only {
            profiles.retain(|p| p.is_active);
        }
        profiles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(profiles)
    }

    /// Live nodes that satisfy the profile's requirements, best first.
    pub fn compatible_nodes(&self, profile_id: &str, live: &[NodeSnapshot]) -> SchedulerResult<Vec<ScoredNode>> {
        let profile = self.get(profile_id)?;
        let filter = NodeFilter::Profile(ProfileRequirements::from(&profile));
        Ok(self.selector.rank(live, &filter))
    }

    /// Active profiles a machine with the given resources could satisfy,
    /// highest priority first. Absent resources do not constrain.
    /// `gpu: Some(false)` excludes profiles that require a GPU.
    pub fn suitable_for(
        &self,
        cpu_cores: Option<u32>,
        ram_gb: Option<f64>,
        gpu: Option<bool>,
    ) -> SchedulerResult<Vec<Profile>> {
        let mut profiles = self.list(true)?;
        profiles.retain(|p| {
            cpu_cores.is_none_or(|cores| p.cpu_cores_min <= cores)
                && ram_gb.is_none_or(|ram| p.ram_gb_min <= ram)
                && (!p.gpu_required || gpu != Some(false))
        });
        Ok(profiles)
    }

    /// Create any default profile whose name is not taken yet.
    ///
    /// Returns the names that were created.
    pub fn seed_defaults(&self) -> SchedulerResult<Vec<String>> {
        let mut created = Vec::new();
        for spec in default_profiles() {
            if self.state.get_profile_by_name(&spec.name)?.is_some() {
                continue;
            }
            let name = spec.name.clone();
            match self.create(spec) {
                Ok(_) => created.push(name),
                Err(e) => {
                    // Lost a race with another seeder; the name exists now.
                    if self.state.get_profile_by_name(&name)?.is_none() {
                        return Err(e);
                    }
                }
            }
        }
        if !created.is_empty() {
            info!(count = created.len(), "default profiles seeded");
        }
        Ok(created)
    }
}

/// Reject profiles that could never be satisfied or are malformed.
pub fn validate(profile: &Profile) -> SchedulerResult<()> {
    if profile.name.trim().is_empty() {
        return Err(SchedulerError::Validation("profile name must not be empty".to_string()));
    }
    if profile.min_nodes == 0 {
        return Err(SchedulerError::Validation("min_nodes must be at least 1".to_string()));
    }
    if profile.min_nodes > profile.max_nodes {
        return Err(SchedulerError::Validation(format!(
            "min_nodes ({}) cannot be greater than max_nodes ({})",
            profile.min_nodes, profile.max_nodes
        )));
    }
    if !profile.ram_gb_min.is_finite() || profile.ram_gb_min < 0.0 {
        return Err(SchedulerError::Validation("ram_gb_min must be a non-negative number".to_string()));
    }
    for (field, value) in [
        ("max_cpu_percent", profile.max_cpu_percent),
        ("max_mem_percent", profile.max_mem_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(SchedulerError::Validation(format!(
                "{field} must be between 0 and 100, got {value}"
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn preset(
    name: &str,
    description: &str,
    nodes: (u32, u32),
    cpu_cores_min: u32,
    ram_gb_min: f64,
    gpu_required: bool,
    max_percent: f64,
    max_active_workloads: u32,
    priority: i32,
) -> ProfileSpec {
    ProfileSpec {
        name: name.to_string(),
        description: description.to_string(),
        min_nodes: nodes.0,
        max_nodes: nodes.1,
        cpu_cores_min,
        ram_gb_min,
        gpu_required,
        max_cpu_percent: max_percent,
        max_mem_percent: max_percent,
        max_active_workloads,
        priority,
    }
}

/// The built-in profile set.
pub fn default_profiles() -> Vec<ProfileSpec> {
    vec![
        preset(
            "Single Node - Light",
            "Single node with minimal resources for development",
            (1, 1),
            1,
            2.0,
            false,
            70.0,
            3,
            0,
        ),
        preset(
            "Single Node - Standard",
            "Single node with standard resources for data science",
            (1, 1),
            2,
            4.0,
            false,
            60.0,
            5,
            10,
        ),
        preset(
            "Single Node - GPU",
            "Single GPU node for machine learning",
            (1, 1),
            4,
            8.0,
            true,
            50.0,
            2,
            20,
        ),
        preset(
            "Multi Node - Distributed",
            "Several nodes for distributed computing",
            (2, 3),
            2,
            4.0,
            false,
            60.0,
            3,
            5,
        ),
        preset(
            "Multi Node - High Performance",
            "High-capacity nodes for heavy workloads",
            (3, 5),
            4,
            8.0,
            false,
            50.0,
            2,
            15,
        ),
    ]
}
