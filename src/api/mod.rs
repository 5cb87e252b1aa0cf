// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter over the engine facade

pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use handlers::{agents, tasks, workflows};

/// Builds the HTTP router over an engine
pub fn router(engine: Engine) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Agent routes
        .route("/api/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/api/agents/presets", post(agents::seed_presets))
        .route(
            "/api/agents/:id",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/api/agents/:id/start", post(agents::start_agent))
        .route("/api/agents/:id/stop", post(agents::stop_agent))
        .route("/api/agents/:id/logs", get(agents::agent_logs))
        // Task routes
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::submit_task))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/api/tasks/:id/wait", get(tasks::wait_task))
        // Workflow routes
        .route(
            "/api/workflows",
            get(workflows::list_workflows).post(workflows::run_workflow),
        )
        .route("/api/workflows/sync", post(workflows::run_workflow_sync))
        .route("/api/workflows/:id", get(workflows::get_workflow))
        .route("/api/workflows/:id/cancel", post(workflows::cancel_workflow))
        .fallback(handlers::not_found)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Shared state
        .with_state(engine)
}
