// Workflow orchestration HTTP routes
//
// Exposes the interaction surface (start/signal/query/update/describe/
// history/list/cancel/terminate) over HTTP/JSON on top of `InteractionApi`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use durable::persistence::PostgresWorkflowEventStore;
use durable::prelude::{Pagination, WorkflowFilter, WorkflowStatus};
use durable::api::{
    ApiError, DescribeWorkflowResponse, GetWorkflowHistoryRequest, GetWorkflowHistoryResponse,
    InteractionApi, SignalWithStartRequest, SignalWorkflowRequest, StartWorkflowRequest,
    StartWorkflowResponse, UpdateWorkflowRequest,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<InteractionApi<PostgresWorkflowEventStore>>,
}

/// Wraps [`ApiError`] so it can be returned directly from axum handlers,
/// mapping the six-member taxonomy onto HTTP status codes and a JSON body.
pub struct ApiErrorResponse(ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            ApiError::ClientError(_) => (StatusCode::BAD_REQUEST, "client_error"),
            ApiError::PreconditionFailure(_) => (StatusCode::CONFLICT, "precondition_failure"),
            ApiError::TransientError(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient_error"),
            ApiError::WorkflowTaskFailure(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "workflow_task_failure")
            }
            ApiError::ActivityFailure(_) => (StatusCode::UNPROCESSABLE_ENTITY, "activity_failure"),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        };
        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(start_workflow))
        .route("/v1/workflows/signal-with-start", post(signal_with_start))
        .route("/v1/workflows/:workflow_id", get(describe_workflow))
        .route("/v1/workflows/:workflow_id/signal", post(signal_workflow))
        .route("/v1/workflows/:workflow_id/query", post(query_workflow))
        .route("/v1/workflows/:workflow_id/update", post(update_workflow))
        .route("/v1/workflows/:workflow_id/cancel", post(cancel_workflow))
        .route("/v1/workflows/:workflow_id/terminate", post(terminate_workflow))
        .route("/v1/workflows/:workflow_id/history", get(get_workflow_history))
        .with_state(state)
}

/// POST /v1/workflows - start a new workflow run
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = StartWorkflowRequest,
    responses(
        (status = 201, description = "Workflow started", body = StartWorkflowResponse),
        (status = 400, description = "Invalid request"),
    ),
    tag = "workflows"
)]
pub async fn start_workflow(
    State(state): State<AppState>,
    Json(req): Json<StartWorkflowRequest>,
) -> Result<(StatusCode, Json<StartWorkflowResponse>), ApiErrorResponse> {
    let resp = state.api.start_workflow(req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// POST /v1/workflows/signal-with-start
#[utoipa::path(
    post,
    path = "/v1/workflows/signal-with-start",
    request_body = SignalWithStartRequest,
    responses(
        (status = 200, description = "Signal delivered, starting a run if needed", body = StartWorkflowResponse),
        (status = 400, description = "Invalid request"),
    ),
    tag = "workflows"
)]
pub async fn signal_with_start(
    State(state): State<AppState>,
    Json(req): Json<SignalWithStartRequest>,
) -> Result<Json<StartWorkflowResponse>, ApiErrorResponse> {
    let resp = state.api.signal_with_start(req).await?;
    Ok(Json(resp))
}

/// GET /v1/workflows/:workflow_id - describe a run
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    responses(
        (status = 200, description = "Run description", body = DescribeWorkflowResponse),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn describe_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<DescribeWorkflowResponse>, ApiErrorResponse> {
    let resp = state.api.describe_workflow(workflow_id).await?;
    Ok(Json(resp))
}

/// POST /v1/workflows/:workflow_id/signal
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/signal",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    request_body = SignalWorkflowRequest,
    responses(
        (status = 204, description = "Signal accepted"),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn signal_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<SignalWorkflowRequest>,
) -> Result<StatusCode, ApiErrorResponse> {
    state.api.signal_workflow(workflow_id, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for the query endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryWorkflowRequest {
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub args: serde_json::Value,
}

/// POST /v1/workflows/:workflow_id/query
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/query",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    request_body = QueryWorkflowRequest,
    responses(
        (status = 200, description = "Query result", body = Object),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn query_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<QueryWorkflowRequest>,
) -> Result<Json<serde_json::Value>, ApiErrorResponse> {
    let result = state
        .api
        .query_workflow(workflow_id, &req.name, req.args)
        .await?;
    Ok(Json(result))
}

/// POST /v1/workflows/:workflow_id/update
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/update",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    request_body = UpdateWorkflowRequest,
    responses(
        (status = 200, description = "Update result", body = Object),
        (status = 404, description = "Not found"),
        (status = 409, description = "Update rejected"),
    ),
    tag = "workflows"
)]
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<UpdateWorkflowRequest>,
) -> Result<Json<serde_json::Value>, ApiErrorResponse> {
    let result = state.api.update_workflow(workflow_id, req).await?;
    Ok(Json(result))
}

/// Optional reason carried on cancel/terminate requests.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /v1/workflows/:workflow_id/cancel
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/cancel",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    request_body = ReasonRequest,
    responses(
        (status = 204, description = "Cancellation requested"),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    body: Option<Json<ReasonRequest>>,
) -> Result<StatusCode, ApiErrorResponse> {
    let reason = body.and_then(|Json(r)| r.reason).unwrap_or_else(|| "cancelled via API".into());
    state.api.cancel_workflow(workflow_id, reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/workflows/:workflow_id/terminate
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/terminate",
    params(("workflow_id" = Uuid, Path, description = "Workflow run id")),
    request_body = ReasonRequest,
    responses(
        (status = 204, description = "Workflow terminated"),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn terminate_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    body: Option<Json<ReasonRequest>>,
) -> Result<StatusCode, ApiErrorResponse> {
    let reason = body.and_then(|Json(r)| r.reason).unwrap_or_else(|| "terminated via API".into());
    state.api.terminate_workflow(workflow_id, reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for listing workflows.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListWorkflowsParams {
    pub workflow_type: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub workflow_id_prefix: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

fn default_list_limit() -> u32 {
    100
}

/// GET /v1/workflows - list runs matching a filter
#[utoipa::path(
    get,
    path = "/v1/workflows",
    params(ListWorkflowsParams),
    responses(
        (status = 200, description = "Matching runs", body = Vec<DescribeWorkflowResponse>),
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<Vec<DescribeWorkflowResponse>>, ApiErrorResponse> {
    let filter = WorkflowFilter {
        workflow_type: params.workflow_type,
        status: params.status,
        workflow_id_prefix: params.workflow_id_prefix,
    };
    let pagination = Pagination {
        offset: params.offset,
        limit: if params.limit == 0 { default_list_limit() } else { params.limit },
    };
    let resp = state.api.list_workflows(filter, pagination).await?;
    Ok(Json(resp))
}

/// Query parameters for fetching history.
#[derive(Debug, Deserialize, IntoParams)]
pub struct GetWorkflowHistoryParams {
    #[serde(default)]
    pub from_event_id: i32,
    #[serde(default)]
    pub to_event_id: Option<i32>,
}

/// GET /v1/workflows/:workflow_id/history
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/history",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow run id"),
        GetWorkflowHistoryParams,
    ),
    responses(
        (status = 200, description = "History events", body = GetWorkflowHistoryResponse),
        (status = 404, description = "Not found"),
    ),
    tag = "workflows"
)]
pub async fn get_workflow_history(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Query(params): Query<GetWorkflowHistoryParams>,
) -> Result<Json<GetWorkflowHistoryResponse>, ApiErrorResponse> {
    let resp = state
        .api
        .get_workflow_history(GetWorkflowHistoryRequest {
            workflow_id,
            from_event_id: params.from_event_id,
            to_event_id: params.to_event_id,
        })
        .await?;
    Ok(Json(resp))
}
