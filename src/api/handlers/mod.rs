// HTTP handlers, one module per resource

pub mod agents;
pub mod tasks;
pub mod workflows;

use axum::Json;
use serde_json::{json, Value};

use crate::api::errors::ApiError;

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Any route the router does not know
pub async fn not_found() -> ApiError {
    ApiError::not_found("No such route")
}
