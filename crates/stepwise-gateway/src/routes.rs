use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use stepwise_core::error::StepwiseError;
use stepwise_core::types::{ExecutionId, ExecutionRecord, ExecutionStatus};
use stepwise_engine::WorkflowSummary;

use crate::protocol::{ApiError, ApiResponse, ExecuteBody, JsonBody, ResumeBody, SuspendBody};
use crate::sse;
use crate::state::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workflows": state.registry.list().len(),
    }))
}

// GET /workflows
pub async fn list_workflows(State(state): State<Arc<AppState>>) -> ApiResult<Vec<WorkflowSummary>> {
    Ok(ApiResponse::ok(state.registry.list()))
}

// GET /workflows/{id}
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let definition = state.registry.get(&id)?;
    Ok(ApiResponse::ok(definition.describe()))
}

// POST /workflows/{id}/execute
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<ExecuteBody>,
) -> ApiResult<ExecutionRecord> {
    let record = state.registry.execute(&id, body.input).await?;
    Ok(ApiResponse::ok(record))
}

// POST /workflows/{id}/stream
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<JsonBody<ExecuteBody>, ApiError>,
) -> Response {
    let JsonBody(body) = match body {
        Ok(body) => body,
        Err(e) => return sse::failed(e),
    };
    match state.registry.stream(&id, body.input).await {
        Ok(run) => {
            info!(workflow_id = %id, execution_id = %run.execution_id(), "Streaming execution");
            sse::relay(run)
        }
        Err(e) => sse::failed(e.into()),
    }
}

// POST /workflows/{id}/executions/{exec_id}/suspend
pub async fn suspend(
    State(state): State<Arc<AppState>>,
    Path((id, exec_id)): Path<(String, String)>,
    JsonBody(body): JsonBody<SuspendBody>,
) -> ApiResult<Value> {
    let execution_id = ExecutionId::from_string(&exec_id);
    let record = state
        .registry
        .execution_state(&id, &execution_id)
        .await
        .map_err(|e| match e {
            StepwiseError::ExecutionNotFound(_) | StepwiseError::WorkflowNotFound(_) => {
                StepwiseError::NoActiveExecution(exec_id.clone())
            }
            other => other,
        })?;

    match state.registry.suspend(&execution_id, body.reason.clone()) {
        Ok(()) => Ok(ApiResponse::ok(json!({
            "executionId": execution_id,
            "suspended": true,
            "reason": body.reason,
        }))),
        Err(StepwiseError::NoActiveExecution(_)) if record.status != ExecutionStatus::Running => {
            Err(StepwiseError::NotRunning {
                execution_id: exec_id,
                status: record.status.to_string(),
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

// POST /workflows/{id}/executions/{exec_id}/resume
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path((id, exec_id)): Path<(String, String)>,
    JsonBody(body): JsonBody<ResumeBody>,
) -> ApiResult<ExecutionRecord> {
    let execution_id = ExecutionId::from_string(&exec_id);
    let record = state
        .registry
        .resume(&id, &execution_id, body.resume_data, body.step_id.as_deref())
        .await
        .map_err(not_suspended_is_not_found)?;
    Ok(ApiResponse::ok(record))
}

// POST /workflows/{id}/executions/{exec_id}/resume-stream
pub async fn resume_stream(
    State(state): State<Arc<AppState>>,
    Path((id, exec_id)): Path<(String, String)>,
    body: Result<JsonBody<ResumeBody>, ApiError>,
) -> Response {
    let JsonBody(body) = match body {
        Ok(body) => body,
        Err(e) => return sse::failed(e),
    };
    let execution_id = ExecutionId::from_string(&exec_id);
    match state
        .registry
        .resume_stream(&id, &execution_id, body.resume_data, body.step_id.as_deref())
        .await
    {
        Ok(run) => sse::relay(run),
        Err(e) => sse::failed(not_suspended_is_not_found(e)),
    }
}

// GET /workflows/{id}/executions/{exec_id}/state
pub async fn execution_state(
    State(state): State<Arc<AppState>>,
    Path((id, exec_id)): Path<(String, String)>,
) -> ApiResult<ExecutionRecord> {
    let record = state
        .registry
        .execution_state(&id, &ExecutionId::from_string(&exec_id))
        .await?;
    Ok(ApiResponse::ok(record))
}

// GET /workflows/{id}/executions
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ExecutionRecord>> {
    Ok(ApiResponse::ok(state.registry.list_executions(&id).await?))
}

/// Resume reports a non-suspended execution as not found.
fn not_suspended_is_not_found(e: StepwiseError) -> ApiError {
    let not_suspended = matches!(e, StepwiseError::NotSuspended { .. });
    let err = ApiError::from(e);
    if not_suspended {
        err.with_status(StatusCode::NOT_FOUND)
    } else {
        err
    }
}
