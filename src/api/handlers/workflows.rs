use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::domain::workflow::Workflow;
use crate::engine::{Engine, WorkflowResult};

/// Request body for starting a workflow
#[derive(Debug, Deserialize)]
pub struct RunWorkflowRequest {
    pub prompt: String,
    /// Only used by the synchronous variant
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Start a workflow in the background
///
/// POST /api/workflows
pub async fn run_workflow(
    State(engine): State<Engine>,
    Json(req): Json<RunWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = engine.run_workflow(&req.prompt).await?;
    Ok((StatusCode::ACCEPTED, Json(workflow)))
}

/// Run a workflow and respond once it finished
///
/// POST /api/workflows/sync
pub async fn run_workflow_sync(
    State(engine): State<Engine>,
    Json(req): Json<RunWorkflowRequest>,
) -> Result<Json<WorkflowResult>, ApiError> {
    if req.timeout_secs == Some(0) {
        return Err(ApiError::bad_request("timeout_secs must be positive"));
    }
    let timeout = req.timeout_secs.map(Duration::from_secs);
    Ok(Json(engine.run_workflow_sync(&req.prompt, timeout).await?))
}

/// GET /api/workflows
pub async fn list_workflows(
    State(engine): State<Engine>,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(engine.list_workflows().await?))
}

/// Workflow with its subtasks
///
/// GET /api/workflows/:id
pub async fn get_workflow(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowResult>, ApiError> {
    Ok(Json(engine.get_workflow(id).await?))
}

/// POST /api/workflows/:id/cancel
pub async fn cancel_workflow(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowResult>, ApiError> {
    Ok(Json(engine.cancel_workflow(id).await?))
}
