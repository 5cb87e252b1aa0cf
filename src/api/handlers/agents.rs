use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::domain::agent::{AgentRecord, AgentSpec, AgentStatus};
use crate::domain::log::LogLine;
use crate::engine::Engine;

const DEFAULT_LOG_LINES: usize = 50;
const MAX_LOG_LINES: usize = 1_000;

/// Agent configuration and runtime state, flattened for clients
#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub model: String,
    pub capabilities: Vec<String>,
    pub disallowed_capabilities: Vec<String>,
    pub mcp_servers: BTreeMap<String, Value>,
    pub max_turns: u32,
    pub max_budget_usd: Option<Decimal>,
    pub permission_mode: String,
    pub cwd: Option<String>,
    pub auto_restart: bool,
    pub max_restarts: u32,
    pub status: AgentStatus,
    pub session_id: Option<String>,
    pub current_task_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<AgentRecord> for AgentResponse {
    fn from(record: AgentRecord) -> Self {
        let AgentRecord { config, state } = record;
        Self {
            capabilities: config
                .capabilities
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            disallowed_capabilities: config
                .disallowed_capabilities
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            mcp_servers: config.mcp_servers,
            permission_mode: config.permission_mode.to_string(),
            id: config.id,
            name: config.name,
            description: config.description,
            model: config.model,
            max_turns: config.max_turns,
            max_budget_usd: config.max_budget_usd,
            cwd: config.cwd,
            auto_restart: config.auto_restart,
            max_restarts: config.max_restarts,
            status: state.status,
            session_id: state.session_id,
            current_task_id: state.current_task_id,
            last_error: state.last_error,
            restart_count: state.restart_count,
            started_at: state.started_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// Create a new agent (Stopped)
///
/// POST /api/agents
pub async fn create_agent(
    State(engine): State<Engine>,
    Json(spec): Json<AgentSpec>,
) -> Result<(StatusCode, Json<AgentResponse>), ApiError> {
    let record = engine.create_agent(spec).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Register the echo, coder and reviewer agents that are missing
///
/// POST /api/agents/presets
pub async fn seed_presets(
    State(engine): State<Engine>,
) -> Result<(StatusCode, Json<Vec<AgentResponse>>), ApiError> {
    let created = engine.seed_presets().await?;
    Ok((
        StatusCode::CREATED,
        Json(created.into_iter().map(AgentResponse::from).collect()),
    ))
}

/// GET /api/agents
pub async fn list_agents(State(engine): State<Engine>) -> Json<Vec<AgentResponse>> {
    let agents = engine.list_agents().await;
    Json(agents.into_iter().map(AgentResponse::from).collect())
}

/// GET /api/agents/:id
pub async fn get_agent(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    Ok(Json(engine.get_agent(&id).await?.into()))
}

/// Delete an agent that is not running
///
/// DELETE /api/agents/:id
pub async fn delete_agent(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    engine.delete_agent(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/agents/:id/start
pub async fn start_agent(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    Ok(Json(engine.start_agent(&id).await?.into()))
}

/// POST /api/agents/:id/stop
pub async fn stop_agent(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    Ok(Json(engine.stop_agent(&id).await?.into()))
}

/// Most recent log lines of an agent, oldest first
///
/// GET /api/agents/:id/logs?lines=50
pub async fn agent_logs(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogLine>>, ApiError> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES).min(MAX_LOG_LINES);
    Ok(Json(engine.tail_logs(&id, lines).await?))
}
