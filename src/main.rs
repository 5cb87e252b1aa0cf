use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use conclave_api::api;
use conclave_api::config::Settings;
use conclave_api::engine::Engine;
use conclave_api::infrastructure::invokers::{
    ClaudeCliInvoker, ExternalHttpInvoker, RoutingInvoker,
};
use conclave_api::infrastructure::repositories::SqliteStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load settings (reads .env)
    let settings = Settings::from_env();

    // Connect to database
    tracing::info!(url = %settings.database_url, "Connecting to database...");
    let store = SqliteStore::connect(&settings.database_url)
        .await
        .expect("Failed to open database");
    tracing::info!("Database connected successfully");

    let cli = ClaudeCliInvoker::new(settings.claude_bin.clone())
        .with_default_cwd(settings.engine.workdir.clone().map(Into::into));
    let external = ExternalHttpInvoker::new(settings.gemini_api_key.clone())
        .with_gemini_base_url(settings.gemini_base_url.clone());
    let invoker = RoutingInvoker::new(Arc::new(cli), Arc::new(external));

    let engine = Engine::init(Arc::new(store), Arc::new(invoker), settings.engine.clone())
        .await
        .expect("Failed to initialize engine");

    if settings.seed_presets {
        engine
            .seed_presets()
            .await
            .expect("Failed to seed preset agents");
    }

    let app = api::router(engine.clone());

    // Start server
    tracing::info!("Server listening on {}", settings.bind_addr);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    engine.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
