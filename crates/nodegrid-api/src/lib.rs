//! nodegrid-api — REST API for the nodegrid control plane.
//!
//! Provides axum route handlers for node reports, fleet queries, profiles,
//! sessions, and allocations. Every JSON response uses the
//! `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health-check` | Service liveness |
//! | POST | `/api/v1/nodes/report` | Agent report (liveness upsert) |
//! | GET | `/api/v1/nodes` | List nodes (`include_stale`) |
//! | GET | `/api/v1/nodes/available` | Eligible nodes, best first (`filter`, `profile_id`) |
//! | GET | `/api/v1/nodes/pick` | Pick one node (`filter`, `profile_id`, `strategy`) |
//! | POST | `/api/v1/nodes/select` | Choose `count` nodes without allocating |
//! | GET | `/api/v1/nodes/{hostname}` | Node details |
//! | GET | `/api/v1/nodes/{hostname}/metrics` | Metric history (`hours`) |
//! | GET | `/api/v1/cluster/summary` | Cluster summary |
//! | GET/POST | `/api/v1/profiles` | List (`active_only`) / create profiles |
//! | POST | `/api/v1/profiles/suitable` | Active profiles a machine can satisfy |
//! | POST | `/api/v1/profiles/initialize-defaults` | Seed the built-in profiles |
//! | GET/PUT/DELETE | `/api/v1/profiles/{id}` | Get / update / retire a profile |
//! | GET | `/api/v1/profiles/{id}/nodes` | Live nodes compatible with a profile |
//! | GET/POST | `/api/v1/allocations` | List / allocate |
//! | GET | `/api/v1/allocations/{id}` | Allocation details |
//! | PUT | `/api/v1/allocations/{id}/status` | Launcher status update |
//! | GET | `/api/v1/sessions` | List sessions |
//! | GET | `/api/v1/sessions/{id}/allocations` | Allocations of a session |
//! | POST | `/api/v1/sessions/{id}/deallocate` | Release a session |
//! | GET | `/metrics` | Prometheus exposition |

pub mod allocation_handlers;
pub mod handlers;
pub mod profile_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use nodegrid_cluster::{ClusterQuery, LivenessStore, NodeRegistry};
use nodegrid_core::NodegridConfig;
use nodegrid_placement::{ScoringWeights, Selector, Strategy};
use nodegrid_scheduler::{Allocator, ProfileCatalog, SchedulerError};
use nodegrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<NodeRegistry>,
    pub query: ClusterQuery,
    pub catalog: ProfileCatalog,
    pub allocator: Allocator,
}

impl ApiState {
    /// Wire every component from one store, one liveness backend, and the config.
    ///
    /// All components share a single `Selector`, so the round-robin cursor
    /// is global to the process.
    pub fn new(
        store: StateStore,
        liveness: Arc<dyn LivenessStore>,
        config: &NodegridConfig,
    ) -> Result<Self, SchedulerError> {
        let strategy: Strategy = config
            .allocation
            .strategy
            .parse()
            .map_err(SchedulerError::Validation)?;
        let weights = ScoringWeights::from(&config.scoring);
        let selector = Arc::new(Selector::new(weights.clone(), config.filters.clone()));

        let registry = NodeRegistry::new(store.clone(), liveness.clone())
            .with_ttl(config.liveness.ttl())
            .with_weights(weights)
            .with_metrics_retention(config.sweeper.metrics_retention());

        Ok(Self {
            registry: Arc::new(registry),
            query: ClusterQuery::new(store.clone(), liveness, selector.clone()),
            catalog: ProfileCatalog::new(store.clone(), selector.clone()),
            allocator: Allocator::new(store, selector).with_strategy(strategy),
        })
    }
}

/// Build the complete API router (REST + health + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/report", post(handlers::report_node))
        .route("/nodes/available", get(handlers::available_nodes))
        .route("/nodes/pick", get(handlers::pick_node))
        .route("/nodes/select", post(handlers::select_nodes))
        .route("/nodes/{hostname}", get(handlers::get_node))
        .route("/nodes/{hostname}/metrics", get(handlers::node_metrics))
        .route("/cluster/summary", get(handlers::cluster_summary))
        .route("/profiles", get(profile_handlers::list_profiles).post(profile_handlers::create_profile))
        .route("/profiles/suitable", post(profile_handlers::suitable_profiles))
        .route("/profiles/initialize-defaults", post(profile_handlers::initialize_defaults))
        .route(
            "/profiles/{id}",
            get(profile_handlers::get_profile)
                .put(profile_handlers::update_profile)
                .delete(profile_handlers::delete_profile),
        )
        .route("/profiles/{id}/nodes", get(profile_handlers::compatible_nodes))
        .route(
            "/allocations",
            get(allocation_handlers::list_allocations).post(allocation_handlers::allocate),
        )
        .route("/allocations/{id}", get(allocation_handlers::get_allocation))
        .route("/allocations/{id}/status", put(allocation_handlers::update_status))
        .route("/sessions", get(allocation_handlers::list_sessions))
        .route("/sessions/{id}/allocations", get(allocation_handlers::session_allocations))
        .route("/sessions/{id}/deallocate", post(allocation_handlers::deallocate))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health-check", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
