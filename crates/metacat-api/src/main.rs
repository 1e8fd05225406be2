//! metacat API Server
//!
//! Credential issuance and session lifecycle service.

use anyhow::Context;
use metacat_api::{auth::spawn_prune_task, create_router, state::AppState};
use metacat_core::{open_store, AppConfig, LoggingConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        format!("metacat_api={level},metacat_core={level},audit=info,tower_http=info").into()
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    if config.auth.uses_development_secret() {
        tracing::warn!("JWT_SECRET is not set; using the development signing secret");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let prune_interval = Duration::from_secs(config.auth.prune_interval_secs);

    // Open the session store
    let store = open_store(&config.store)
        .await
        .with_context(|| format!("failed to open {} session store", config.store.backend))?;
    tracing::info!(backend = %config.store.backend, "Session store ready");

    // Create application state
    let state = Arc::new(AppState::new(config, store)?);
    let _pruner = spawn_prune_task(state.auth.clone(), prune_interval);

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("metacat API server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
