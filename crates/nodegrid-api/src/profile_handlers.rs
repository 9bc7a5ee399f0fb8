//! Profile catalog handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use nodegrid_state::{ProfileSpec, ProfileUpdate};
use serde::Deserialize;

use crate::ApiState;
use crate::handlers::{ApiResponse, scheduler_error};

#[derive(Debug, Deserialize)]
pub struct ListProfilesParams {
    #[serde(default = "active_only_default")]
    pub active_only: bool,
}

fn active_only_default() -> bool {
    true
}

/// GET /api/v1/profiles
pub async fn list_profiles(
    State(state): State<ApiState>,
    Query(params): Query<ListProfilesParams>,
) -> impl IntoResponse {
    match state.catalog.list(params.active_only) {
        Ok(profiles) => ApiResponse::ok(profiles).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/profiles
pub async fn create_profile(
    State(state): State<ApiState>,
    Json(spec): Json<ProfileSpec>,
) -> impl IntoResponse {
    match state.catalog.create(spec) {
        Ok(profile) => (StatusCode::CREATED, ApiResponse::ok(profile)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/profiles/{id}
pub async fn get_profile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.get(&id) {
        Ok(profile) => ApiResponse::ok(profile).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// PUT /api/v1/profiles/{id}
pub async fn update_profile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> impl IntoResponse {
    match state.catalog.update(&id, update) {
        Ok(profile) => ApiResponse::ok(profile).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// DELETE /api/v1/profiles/{id}
pub async fn delete_profile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.catalog.delete(&id) {
        Ok(profile) => ApiResponse::ok(profile).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/profiles/{id}/nodes
pub async fn compatible_nodes(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let live = state.query.live_nodes();
    match state.catalog.compatible_nodes(&id, &live) {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SuitableProfilesRequest {
    #[serde(alias = "cpu")]
    pub cpu_cores: Option<u32>,
    #[serde(alias = "ram")]
    pub ram_gb: Option<f64>,
    pub gpu: Option<bool>,
}

/// POST /api/v1/profiles/suitable
pub async fn suitable_profiles(
    State(state): State<ApiState>,
    Json(request): Json<SuitableProfilesRequest>,
) -> impl IntoResponse {
    match state
        .catalog
        .suitable_for(request.cpu_cores, request.ram_gb, request.gpu)
    {
        Ok(profiles) => ApiResponse::ok(profiles).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/profiles/initialize-defaults
///
/// Returns the names of the profiles that were created; existing names are
/// left alone.
pub async fn initialize_defaults(State(state): State<ApiState>) -> impl IntoResponse {
    match state.catalog.seed_defaults() {
        Ok(created) => ApiResponse::ok(created).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{snapshot, test_state};

    fn spec(name: &str) -> ProfileSpec {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "min_nodes": 1,
            "max_nodes": 2,
            "cpu_cores_min": 8,
            "ram_gb_min": 32.0,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_and_get_profile() {
        let state = test_state();

        let resp = create_profile(State(state.clone()), Json(spec("basic"))).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let id = state.catalog.get_by_name("basic").unwrap().id;
        let resp = get_profile(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_name_is_bad_request() {
        let state = test_state();
        create_profile(State(state.clone()), Json(spec("basic"))).await;
        let resp = create_profile(State(state), Json(spec("basic"))).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_bounds_are_bad_request() {
        let state = test_state();
        let mut bad = spec("bad");
        bad.min_nodes = 5;
        bad.max_nodes = 2;
        let resp = create_profile(State(state), Json(bad)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_profile() {
        let state = test_state();
        let resp = get_profile(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_hides_from_active_listing() {
        let state = test_state();
        let profile = state.catalog.create(spec("basic")).unwrap();

        let resp = delete_profile(State(state.clone()), Path(profile.id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(state.catalog.list(true).unwrap().is_empty());
        let resp = list_profiles(State(state), Query(ListProfilesParams { active_only: false }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn update_profile_applies_fields() {
        let state = test_state();
        let profile = state.catalog.create(spec("basic")).unwrap();

        let update = ProfileUpdate {
            priority: Some(9),
            ..Default::default()
        };
        let resp = update_profile(State(state.clone()), Path(profile.id.clone()), Json(update))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.catalog.get(&profile.id).unwrap().priority, 9);
    }

    #[tokio::test]
    async fn initialize_defaults_is_idempotent() {
        let state = test_state();

        let resp = initialize_defaults(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 5);

        let resp = initialize_defaults(State(state.clone())).await.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["data"].as_array().unwrap().is_empty());
        assert_eq!(state.catalog.list(true).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn suitable_profiles_by_resources() {
        let state = test_state();
        state.catalog.create(spec("big")).unwrap();
        let mut small = spec("small");
        small.cpu_cores_min = 2;
        small.ram_gb_min = 4.0;
        state.catalog.create(small).unwrap();

        let request: SuitableProfilesRequest =
            serde_json::from_value(serde_json::json!({ "cpu": 4, "ram": 16.0 })).unwrap();
        let resp = suitable_profiles(State(state), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let profiles = body["data"].as_array().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["name"], "small");
    }

    #[tokio::test]
    async fn compatible_nodes_filters_live_nodes() {
        let state = test_state();
        let profile = state.catalog.create(spec("basic")).unwrap();
        state.registry.report(snapshot("fit", 10.0, 10.0)).unwrap();
        let mut small = snapshot("small", 10.0, 10.0);
        small.cpu_cores = 2;
        state.registry.report(small).unwrap();

        let resp = compatible_nodes(State(state), Path(profile.id)).await.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let nodes = body["data"].as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["hostname"], "fit");
    }
}
