//! REST API handlers for nodes, the cluster summary, and metrics.
//!
//! Also holds the response envelope and error mapping shared by the
//! profile and allocation handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nodegrid_cluster::ClusterError;
use nodegrid_placement::{NodeFilter, ProfileRequirements, Strategy};
use nodegrid_scheduler::{AllocationFilter, SchedulerError, Shortfall};
use nodegrid_state::{NodeSnapshot, Profile};
use serde::Deserialize;
use tracing::warn;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn scheduler_error(e: SchedulerError) -> Response {
    let status = match &e {
        SchedulerError::ProfileNotFound(_)
        | SchedulerError::SessionNotFound(_)
        | SchedulerError::AllocationNotFound(_)
        | SchedulerError::NoSuitableNodes(_) => StatusCode::NOT_FOUND,
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Store(_) => {
            warn!(error = %e, "state store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

pub(crate) fn cluster_error(e: ClusterError) -> Response {
    let status = match &e {
        ClusterError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        ClusterError::Validation(_) => StatusCode::BAD_REQUEST,
        ClusterError::Liveness(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "cluster operation failed");
    }
    error_response(&e.to_string(), status)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Health ─────────────────────────────────────────────────────

/// GET /health-check
pub async fn health_check() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "status": "healthy",
        "service": "nodegrid",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Nodes ──────────────────────────────────────────────────────

/// POST /api/v1/nodes/report
pub async fn report_node(
    State(state): State<ApiState>,
    Json(snapshot): Json<NodeSnapshot>,
) -> impl IntoResponse {
    let hostname = snapshot.hostname.clone();
    match state.registry.report(snapshot) {
        Ok(load_score) => ApiResponse::ok(serde_json::json!({
            "hostname": hostname,
            "load_score": load_score,
            "ttl_secs": state.registry.ttl().as_secs(),
        }))
        .into_response(),
        Err(e) => cluster_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListNodesParams {
    pub include_stale: bool,
}

/// GET /api/v1/nodes
pub async fn list_nodes(
    State(state): State<ApiState>,
    Query(params): Query<ListNodesParams>,
) -> impl IntoResponse {
    match state.query.list_all_nodes(params.include_stale) {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => cluster_error(e),
    }
}

/// Node selection parameters shared by `available` and `pick`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// `default`, `strict` or `any`. Ignored when `profile_id` is given.
    pub filter: Option<String>,
    pub profile_id: Option<String>,
    pub strategy: Option<String>,
}

fn resolve_selection(
    state: &ApiState,
    profile_id: Option<&str>,
    filter: Option<&str>,
) -> Result<(NodeFilter, Option<Profile>), Response> {
    if let Some(profile_id) = profile_id {
        let profile = state.catalog.get(profile_id).map_err(scheduler_error)?;
        return Ok((NodeFilter::Profile(ProfileRequirements::from(&profile)), Some(profile)));
    }
    let filter = match filter {
        None => NodeFilter::Default,
        Some(name) => name
            .parse()
            .map_err(|e: String| error_response(&e, StatusCode::BAD_REQUEST))?,
    };
    Ok((filter, None))
}

fn resolve_filter(state: &ApiState, params: &SelectionParams) -> Result<NodeFilter, Response> {
    resolve_selection(state, params.profile_id.as_deref(), params.filter.as_deref()).map(|(filter, _)| filter)
}

fn parse_strategy(strategy: Option<&str>) -> Result<Strategy, Response> {
    match strategy {
        None => Ok(Strategy::BestFit),
        Some(s) => s.parse().map_err(|e: String| error_response(&e, StatusCode::BAD_REQUEST)),
    }
}

/// GET /api/v1/nodes/available
pub async fn available_nodes(
    State(state): State<ApiState>,
    Query(params): Query<SelectionParams>,
) -> impl IntoResponse {
    match resolve_filter(&state, &params) {
        Ok(filter) => ApiResponse::ok(state.query.list_available_nodes(&filter)).into_response(),
        Err(resp) => resp,
    }
}

/// GET /api/v1/nodes/pick
pub async fn pick_node(
    State(state): State<ApiState>,
    Query(params): Query<SelectionParams>,
) -> impl IntoResponse {
    let filter = match resolve_filter(&state, &params) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };
    let strategy = match parse_strategy(params.strategy.as_deref()) {
        Ok(strategy) => strategy,
        Err(resp) => return resp,
    };
    match state.query.pick_node(&filter, strategy) {
        Some(node) => ApiResponse::ok(node).into_response(),
        None => error_response("no suitable nodes available", StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SelectNodesRequest {
    pub filter: Option<String>,
    pub profile_id: Option<String>,
    pub strategy: Option<String>,
    /// Clamped to the profile's node bounds; defaults to `min_nodes`, or 1
    /// without a profile.
    pub count: Option<u32>,
}

/// POST /api/v1/nodes/select
///
/// Chooses several nodes without allocating them.
pub async fn select_nodes(
    State(state): State<ApiState>,
    Json(request): Json<SelectNodesRequest>,
) -> impl IntoResponse {
    let (filter, profile) =
        match resolve_selection(&state, request.profile_id.as_deref(), request.filter.as_deref()) {
            Ok(resolved) => resolved,
            Err(resp) => return resp,
        };
    let strategy = match parse_strategy(request.strategy.as_deref()) {
        Ok(strategy) => strategy,
        Err(resp) => return resp,
    };
    let requested = match &profile {
        Some(profile) => profile.node_count(request.count),
        None => request.count.unwrap_or(1),
    };
    if requested == 0 {
        return error_response("count must be at least 1", StatusCode::BAD_REQUEST);
    }

    let nodes = state.query.select_nodes(&filter, requested as usize, strategy);
    if nodes.is_empty() {
        return error_response("no suitable nodes available", StatusCode::NOT_FOUND);
    }
    let selected = nodes.len() as u32;
    ApiResponse::ok(serde_json::json!({
        "requested": requested,
        "count": selected,
        "nodes": nodes,
        "shortfall": (selected < requested).then_some(Shortfall {
            requested,
            allocated: selected,
        }),
    }))
    .into_response()
}

/// GET /api/v1/nodes/{hostname}
pub async fn get_node(
    State(state): State<ApiState>,
    Path(hostname): Path<String>,
) -> impl IntoResponse {
    match state.query.get_node(&hostname) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => cluster_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_hours")]
    pub hours: u64,
}

fn default_hours() -> u64 {
    24
}

/// GET /api/v1/nodes/{hostname}/metrics
pub async fn node_metrics(
    State(state): State<ApiState>,
    Path(hostname): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let since = epoch_secs().saturating_sub(params.hours.saturating_mul(3600));
    match state.query.node_metrics_history(&hostname, since) {
        Ok(metrics) => ApiResponse::ok(metrics).into_response(),
        Err(e) => cluster_error(e),
    }
}

// ── Cluster ────────────────────────────────────────────────────

/// GET /api/v1/cluster/summary
pub async fn cluster_summary(State(state): State<ApiState>) -> impl IntoResponse {
    match state.query.cluster_summary() {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => cluster_error(e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let summary = match state.query.cluster_summary() {
        Ok(summary) => summary,
        Err(e) => return cluster_error(e),
    };
    let nodes = match state.query.list_all_nodes(false) {
        Ok(nodes) => nodes,
        Err(e) => return cluster_error(e),
    };
    let allocations = match state.allocator.list_allocations(&AllocationFilter::default()) {
        Ok(allocations) => allocations,
        Err(e) => return scheduler_error(e),
    };

    let body = nodegrid_metrics::render_prometheus(&summary, &nodes, &allocations);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nodegrid_cluster::MemoryLiveness;
    use nodegrid_core::NodegridConfig;
    use nodegrid_state::StateStore;
    use std::sync::Arc;

    pub(crate) fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState::new(store, Arc::new(MemoryLiveness::default()), &NodegridConfig::default()).unwrap()
    }

    pub(crate) fn snapshot(hostname: &str, cpu: f64, mem: f64) -> NodeSnapshot {
        let mut s = NodeSnapshot::new(hostname, "10.0.0.1", cpu, mem);
        s.cpu_cores = 16;
        s.ram_gb = 64.0;
        s
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_ok() {
        let resp = health_check().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn report_then_list() {
        let state = test_state();
        let resp = report_node(State(state.clone()), Json(snapshot("node-1", 10.0, 30.0)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["load_score"], 20.0);

        let resp = list_nodes(State(state), Query(ListNodesParams::default()))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["hostname"], "node-1");
    }

    #[tokio::test]
    async fn invalid_report_is_bad_request() {
        let state = test_state();
        let resp = report_node(State(state), Json(snapshot("", 10.0, 10.0)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn pick_with_strict_filter() {
        let state = test_state();
        for (host, cpu) in [("a", 10.0), ("b", 50.0), ("c", 95.0)] {
            state.registry.report(snapshot(host, cpu, cpu)).unwrap();
        }

        let params = SelectionParams {
            filter: Some("strict".to_string()),
            ..Default::default()
        };
        let resp = pick_node(State(state.clone()), Query(params)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["hostname"], "a");

        let params = SelectionParams {
            filter: Some("strict".to_string()),
            ..Default::default()
        };
        let resp = available_nodes(State(state), Query(params)).await.into_response();
        assert_eq!(body_json(resp).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pick_with_no_nodes_is_not_found() {
        let state = test_state();
        let resp = pick_node(State(state), Query(SelectionParams::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_filter_or_strategy_is_bad_request() {
        let state = test_state();
        let params = SelectionParams {
            filter: Some("loose".to_string()),
            ..Default::default()
        };
        let resp = available_nodes(State(state.clone()), Query(params)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let params = SelectionParams {
            strategy: Some("least_conn".to_string()),
            ..Default::default()
        };
        let resp = pick_node(State(state), Query(params)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_unknown_node() {
        let state = test_state();
        let resp = get_node(State(state), Path("ghost".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_history_for_reported_node() {
        let state = test_state();
        state.registry.report(snapshot("node-1", 10.0, 10.0)).unwrap();
        state.registry.report(snapshot("node-1", 20.0, 20.0)).unwrap();

        let resp = node_metrics(
            State(state),
            Path("node-1".to_string()),
            Query(HistoryParams { hours: 1 }),
        )
        .await
        .into_response();
        let body = body_json(resp).await;
        // Both reports land in the same second; samples share a key.
        assert!(!body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_counts_live_nodes() {
        let state = test_state();
        state.registry.report(snapshot("node-1", 10.0, 10.0)).unwrap();

        let resp = cluster_summary(State(state)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["live_nodes"], 1);
        assert_eq!(body["data"]["health"]["healthy"], 1);
    }

    #[tokio::test]
    async fn select_several_nodes_without_allocating() {
        let state = test_state();
        for (host, cpu) in [("a", 30.0), ("b", 10.0), ("c", 20.0)] {
            state.registry.report(snapshot(host, cpu, cpu)).unwrap();
        }

        let request = SelectNodesRequest {
            count: Some(2),
            ..Default::default()
        };
        let resp = select_nodes(State(state.clone()), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let hosts: Vec<&str> = body["data"]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["hostname"].as_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["b", "c"]);
        assert!(body["data"]["shortfall"].is_null());
        assert!(state.allocator.list_sessions(&Default::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn select_clamps_to_profile_and_reports_shortfall() {
        let state = test_state();
        let spec: nodegrid_state::ProfileSpec = serde_json::from_value(serde_json::json!({
            "name": "trio",
            "min_nodes": 3,
            "max_nodes": 4,
        }))
        .unwrap();
        let profile = state.catalog.create(spec).unwrap();
        state.registry.report(snapshot("a", 10.0, 10.0)).unwrap();
        state.registry.report(snapshot("b", 20.0, 20.0)).unwrap();

        let request = SelectNodesRequest {
            profile_id: Some(profile.id),
            count: Some(1),
            ..Default::default()
        };
        let resp = select_nodes(State(state), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["requested"], 3);
        assert_eq!(body["data"]["count"], 2);
        assert_eq!(body["data"]["shortfall"]["allocated"], 2);
    }

    #[tokio::test]
    async fn select_with_no_nodes_or_zero_count() {
        let state = test_state();
        let resp = select_nodes(State(state.clone()), Json(SelectNodesRequest::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let request = SelectNodesRequest {
            count: Some(0),
            ..Default::default()
        };
        let resp = select_nodes(State(state), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prometheus_counts_stored_allocations() {
        let state = test_state();
        let spec: nodegrid_state::ProfileSpec =
            serde_json::from_value(serde_json::json!({ "name": "solo" })).unwrap();
        let profile = state.catalog.create(spec).unwrap();
        state.registry.report(snapshot("a", 10.0, 10.0)).unwrap();
        let request = nodegrid_scheduler::AllocationRequest {
            session_id: "s1".to_string(),
            user_id: "u".to_string(),
            profile_id: profile.id,
            node_count: None,
        };
        state.allocator.allocate(request, &state.query.live_nodes()).unwrap();

        let resp = prometheus_metrics(State(state)).await.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("nodegrid_allocations{status=\"allocated\"} 1"));
        assert!(text.contains("nodegrid_node_load_score{hostname=\"a\"}"));
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
