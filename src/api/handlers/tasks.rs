use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::domain::task::Task;
use crate::engine::Engine;

/// Request body for submitting a task
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub agent_id: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    pub timeout_secs: Option<u64>,
}

/// Submit a prompt to an idle agent
///
/// POST /api/tasks
pub async fn submit_task(
    State(engine): State<Engine>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = engine.submit_task(&req.agent_id, &req.prompt).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// GET /api/tasks?agent_id=coder
pub async fn list_tasks(
    State(engine): State<Engine>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(engine.list_tasks(query.agent_id.as_deref()).await?))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(engine.task_status(id).await?))
}

/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(engine.cancel_task(id).await?))
}

/// Block until the task is terminal
///
/// GET /api/tasks/:id/wait?timeout_secs=30
pub async fn wait_task(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<Task>, ApiError> {
    let timeout = query.timeout_secs.map(Duration::from_secs);
    Ok(Json(engine.wait_for_task(id, timeout).await?))
}
