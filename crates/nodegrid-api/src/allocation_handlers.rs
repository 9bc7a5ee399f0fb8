//! Allocation and session handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use nodegrid_scheduler::{AllocationFilter, AllocationRequest, SessionFilter, StatusUpdate};

use crate::ApiState;
use crate::handlers::{ApiResponse, scheduler_error};

/// POST /api/v1/allocations
///
/// 201 for a new allocation, 200 when an active session is returned as-is.
pub async fn allocate(
    State(state): State<ApiState>,
    Json(request): Json<AllocationRequest>,
) -> impl IntoResponse {
    let live = state.query.live_nodes();
    match state.allocator.allocate(request, &live) {
        Ok(outcome) if outcome.reused => ApiResponse::ok(outcome).into_response(),
        Ok(outcome) => (StatusCode::CREATED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/allocations
pub async fn list_allocations(
    State(state): State<ApiState>,
    Query(filter): Query<AllocationFilter>,
) -> impl IntoResponse {
    match state.allocator.list_allocations(&filter) {
        Ok(allocations) => ApiResponse::ok(allocations).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/allocations/{id}
pub async fn get_allocation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.allocator.get_allocation(&id) {
        Ok(allocation) => ApiResponse::ok(allocation).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// PUT /api/v1/allocations/{id}/status
pub async fn update_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> impl IntoResponse {
    match state.allocator.update_allocation_status(&id, update) {
        Ok(allocation) => ApiResponse::ok(allocation).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<ApiState>,
    Query(filter): Query<SessionFilter>,
) -> impl IntoResponse {
    match state.allocator.list_sessions(&filter) {
        Ok(sessions) => ApiResponse::ok(sessions).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/sessions/{id}/allocations
pub async fn session_allocations(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.allocator.session_allocations(&id) {
        Ok(allocations) => ApiResponse::ok(allocations).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/sessions/{id}/deallocate
pub async fn deallocate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.allocator.deallocate(&id) {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{snapshot, test_state};
    use nodegrid_state::ProfileSpec;

    fn seeded() -> (ApiState, String) {
        let state = test_state();
        let spec: ProfileSpec = serde_json::from_value(serde_json::json!({
            "name": "pair",
            "min_nodes": 2,
            "max_nodes": 2,
            "cpu_cores_min": 4,
            "ram_gb_min": 8.0,
        }))
        .unwrap();
        let profile = state.catalog.create(spec).unwrap();
        (state, profile.id)
    }

    fn request(session_id: &str, profile_id: &str) -> AllocationRequest {
        AllocationRequest {
            session_id: session_id.to_string(),
            user_id: "alice".to_string(),
            profile_id: profile_id.to_string(),
            node_count: None,
        }
    }

    #[tokio::test]
    async fn allocate_creates_then_reuses() {
        let (state, profile_id) = seeded();
        state.registry.report(snapshot("a", 10.0, 10.0)).unwrap();
        state.registry.report(snapshot("b", 20.0, 20.0)).unwrap();

        let resp = allocate(State(state.clone()), Json(request("s1", &profile_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = allocate(State(state.clone()), Json(request("s1", &profile_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.allocator.list_allocations(&AllocationFilter::default()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn allocate_without_nodes_is_not_found() {
        let (state, profile_id) = seeded();
        let resp = allocate(State(state), Json(request("s1", &profile_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn allocate_unknown_profile_is_not_found() {
        let state = test_state();
        let resp = allocate(State(state), Json(request("s1", "ghost")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_update_and_deallocate() {
        let (state, profile_id) = seeded();
        state.registry.report(snapshot("a", 10.0, 10.0)).unwrap();
        let outcome = state
            .allocator
            .allocate(request("s1", &profile_id), &state.query.live_nodes())
            .unwrap();
        assert!(outcome.shortfall.is_some());

        let update = StatusUpdate {
            status: "running".to_string(),
            port: Some(8888),
            ..Default::default()
        };
        let resp = update_status(State(state.clone()), Path(outcome.allocations[0].id.clone()), Json(update))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let bad = StatusUpdate {
            status: "sleeping".to_string(),
            ..Default::default()
        };
        let resp = update_status(State(state.clone()), Path(outcome.allocations[0].id.clone()), Json(bad))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = deallocate(State(state.clone()), Path("s1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = session_allocations(State(state), Path("s1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deallocate_unknown_session() {
        let state = test_state();
        let resp = deallocate(State(state), Path("ghost".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_sessions_empty() {
        let state = test_state();
        let resp = list_sessions(State(state), Query(SessionFilter::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_allocation() {
        let state = test_state();
        let resp = get_allocation(State(state), Path("ghost".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
