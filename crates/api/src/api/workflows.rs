// Workflow HTTP routes
// Decision: Starting a workflow returns 202 as soon as the instance is durable; progress is polled
// Decision: Engine errors map to status codes in one place (engine_error)

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use orchestra_durable::{
    EngineError, InstanceStatus, RegistryError, StoreError, WorkflowEngine, WorkflowError,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{ApiError, ErrorResponse};

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    /// Prefix for status locations handed back to callers
    pub public_base_url: Option<String>,
}

impl AppState {
    pub fn new(engine: WorkflowEngine, public_base_url: Option<String>) -> Self {
        Self {
            engine,
            public_base_url,
        }
    }

    fn status_location(&self, instance_id: Uuid) -> String {
        format!(
            "{}/workflows/status?instanceId={}",
            self.public_base_url.as_deref().unwrap_or(""),
            instance_id
        )
    }
}

/// Returned when a workflow instance has been accepted
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    /// Identifier of the new instance.
    pub instance_id: Uuid,
    /// Where to poll for the instance's status.
    #[schema(example = "/workflows/status?instanceId=01932c4e-7b1a-7cc0-a1a2-9f3a6f1d2e11")]
    pub status_query_location: String,
}

/// Lifecycle state of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatusDto {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<WorkflowStatus> for WorkflowStatusDto {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Pending => Self::Pending,
            WorkflowStatus::Running => Self::Running,
            WorkflowStatus::Completed => Self::Completed,
            WorkflowStatus::Failed => Self::Failed,
        }
    }
}

/// Why a workflow instance failed
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFailure {
    /// One of activity_failed, retry_exhausted, join_partial_failure, cancelled, validation.
    #[schema(example = "retry_exhausted")]
    pub kind: String,
    /// Step the failure is attributed to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "check_inventory")]
    pub step_id: Option<String>,
    pub message: String,
}

impl From<WorkflowError> for WorkflowFailure {
    fn from(error: WorkflowError) -> Self {
        let kind = serde_json::to_value(error.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            kind,
            step_id: error.step_id,
            message: error.message,
        }
    }
}

/// Status of a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusResponse {
    pub instance_id: Uuid,
    /// Name of the workflow definition.
    #[schema(example = "process_order")]
    pub definition: String,
    pub status: WorkflowStatusDto,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Workflow result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    /// Failure, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowFailure>,
}

impl From<InstanceStatus> for WorkflowStatusResponse {
    fn from(status: InstanceStatus) -> Self {
        Self {
            instance_id: status.instance_id,
            definition: status.definition,
            status: status.status.into(),
            created_at: status.created_at,
            last_updated_at: status.last_updated_at,
            output: status.output,
            error: status.error.map(Into::into),
        }
    }
}

/// Query parameters for status polling
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Instance to look up.
    pub instance_id: Option<String>,
}

/// Optional body for cancellation
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CancelWorkflowRequest {
    /// Recorded as the failure message.
    #[schema(example = "customer withdrew the order")]
    pub reason: Option<String>,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/workflows/status", get(get_workflow_status))
        .route("/workflows/:definition_name", post(start_workflow))
        .route(
            "/workflows/instances/:instance_id/cancel",
            post(cancel_workflow),
        )
        .with_state(state)
}

/// POST /workflows/{definitionName} - Start a workflow instance
#[utoipa::path(
    post,
    path = "/workflows/{definitionName}",
    params(("definitionName" = String, Path, description = "Workflow definition to run")),
    request_body(content = serde_json::Value, description = "Workflow input"),
    responses(
        (status = 202, description = "Instance accepted", body = StartWorkflowResponse),
        (status = 400, description = "Input rejected or body is not JSON", body = ErrorResponse),
        (status = 404, description = "Unknown workflow definition", body = ErrorResponse),
        (status = 503, description = "History store unavailable", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn start_workflow(
    State(state): State<AppState>,
    Path(definition_name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<StartWorkflowResponse>), ApiError> {
    let Json(input) = body?;
    let instance_id = state
        .engine
        .start(&definition_name, input)
        .await
        .map_err(engine_error)?;

    let location = state.status_location(instance_id);
    tracing::info!(%instance_id, definition = %definition_name, "workflow accepted");

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert(header::LOCATION, value);
    }

    Ok((
        StatusCode::ACCEPTED,
        headers,
        Json(StartWorkflowResponse {
            instance_id,
            status_query_location: location,
        }),
    ))
}

/// GET /workflows/status?instanceId={id} - Poll an instance
#[utoipa::path(
    get,
    path = "/workflows/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Current status", body = WorkflowStatusResponse),
        (status = 400, description = "Missing or malformed instanceId", body = ErrorResponse),
        (status = 404, description = "Unknown instance", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_workflow_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<WorkflowStatusResponse>, ApiError> {
    let raw = query
        .instance_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("instanceId query parameter is required"))?;
    let instance_id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::bad_request(format!("instanceId is not a valid UUID: {raw}")))?;

    let status = state
        .engine
        .status(instance_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(status.into()))
}

/// POST /workflows/instances/{instanceId}/cancel - Cancel an instance
#[utoipa::path(
    post,
    path = "/workflows/instances/{instanceId}/cancel",
    params(("instanceId" = Uuid, Path, description = "Instance to cancel")),
    request_body(content = CancelWorkflowRequest, description = "Optional cancellation reason"),
    responses(
        (status = 202, description = "Cancellation recorded"),
        (status = 404, description = "Unknown instance", body = ErrorResponse),
        (status = 409, description = "Instance already finished", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    body: Option<Json<CancelWorkflowRequest>>,
) -> Result<StatusCode, ApiError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "cancelled by request".to_string());

    state
        .engine
        .cancel(instance_id, reason)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::ACCEPTED)
}

fn engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::Validation(validation) => {
            let body = ErrorResponse::new(validation.message.clone())
                .with_details(json!({ "missingFields": validation.missing_fields }));
            ApiError {
                status: StatusCode::BAD_REQUEST,
                body,
            }
        }
        EngineError::Registry(RegistryError::UnknownDefinition(name)) => {
            ApiError::not_found(format!("unknown workflow definition: {name}"))
        }
        EngineError::NotFound(id) => ApiError::not_found(format!("workflow instance not found: {id}")),
        EngineError::Halted(id) => ApiError::new(
            StatusCode::CONFLICT,
            format!("workflow instance {id} has already finished"),
        ),
        EngineError::Store(StoreError::Unavailable(reason)) => {
            tracing::warn!(%reason, "history store unavailable");
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "history store unavailable")
        }
        other => {
            tracing::error!(error = %other, "workflow request failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_durable::ValidationError;

    #[test]
    fn test_validation_error_lists_missing_fields() {
        let err = engine_error(EngineError::Validation(ValidationError::missing_fields(vec![
            "items".to_string(),
        ])));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.details, Some(json!({"missingFields": ["items"]})));
    }

    #[test]
    fn test_error_status_codes() {
        let id = Uuid::now_v7();
        assert_eq!(engine_error(EngineError::NotFound(id)).status, StatusCode::NOT_FOUND);
        assert_eq!(engine_error(EngineError::Halted(id)).status, StatusCode::CONFLICT);
        assert_eq!(
            engine_error(EngineError::Registry(RegistryError::UnknownDefinition(
                "x".to_string()
            )))
            .status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            engine_error(EngineError::Store(StoreError::Unavailable("down".to_string()))).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            engine_error(EngineError::NonDeterminism("changed".to_string())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_failure_kind_is_snake_case() {
        let failure = WorkflowFailure::from(WorkflowError::cancelled("stop"));
        assert_eq!(failure.kind, "cancelled");
        assert_eq!(failure.message, "stop");
    }
}
