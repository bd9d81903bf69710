// Orchestra API Library
// Decision: Shared library for binaries (API server, OpenAPI export) and HTTP tests
// Decision: Router assembly lives here so tests drive the same stack the server runs

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use orchestra_durable::{HistoryStore, InMemoryHistoryStore, PostgresHistoryStore, WorkflowEngine};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// HTTP routes and DTOs
pub mod api;

// Environment configuration
pub mod config;

// Workflow definitions and activities
pub mod orders;

// OpenAPI spec generation
pub mod openapi;

pub use config::ApiConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Open the history store the configuration asks for
///
/// PostgreSQL when `DATABASE_URL` is set (migrations run here), otherwise an
/// in-memory store that loses everything on restart.
pub async fn connect_store(config: &ApiConfig) -> Result<Arc<dyn HistoryStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PostgresHistoryStore::new(pool);
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Using PostgreSQL history store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; history is kept in memory and lost on restart");
            Ok(Arc::new(InMemoryHistoryStore::new()))
        }
    }
}

/// Engine running the order workflow against `store`
pub fn build_engine(store: Arc<dyn HistoryStore>, config: &ApiConfig) -> Result<WorkflowEngine> {
    let activities = orders::order_activities(orders::SimulatedFailures::new(
        config.activity_failure_rate,
    ))?;
    let definitions = orders::definitions()?;
    Ok(WorkflowEngine::new(store, definitions, activities))
}

/// Full HTTP application: workflow routes, health, Swagger UI and request tracing
pub fn build_router(engine: WorkflowEngine, config: &ApiConfig) -> Router {
    let workflows_state = api::workflows::AppState::new(engine, config.public_base_url.clone());

    Router::new()
        .route("/health", get(health))
        .merge(api::workflows::routes(workflows_state))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
}
