// Orchestra API server
// Decision: Unfinished instances are resumed before the listener accepts requests
// Decision: Ctrl-C stops the listener first, then the engine, leaving runs resumable

use std::time::Duration;

use anyhow::{Context, Result};
use orchestra_api::{build_engine, build_router, connect_store, ApiConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orchestra_api=debug,orchestra_durable=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("orchestra-api starting...");

    let config = ApiConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        persistent = config.database_url.is_some(),
        failure_rate = config.activity_failure_rate,
        "Configuration loaded"
    );

    let store = connect_store(&config).await?;
    let engine = build_engine(store, &config)?;

    let resumed = engine
        .resume_unfinished()
        .await
        .context("Failed to resume unfinished workflows")?;
    if !resumed.is_empty() {
        tracing::info!(count = resumed.len(), "Resumed unfinished workflow instances");
    }

    let app = build_router(engine.clone(), &config);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("orchestra-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
