//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{MemoryStore, PgStore},
    build_router,
    config::{Config, StoreBackend},
    error::ApiError,
    jobs::spawn_rollup_job,
    AppState,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visitor_insight_core::ports::VisitorStore;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Open the Store ---
    let store: Arc<dyn VisitorStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            let pg = PgStore::new(pool);
            info!("Running database migrations...");
            pg.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(pg)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(store, config.clone()));

    // --- 4. Background Jobs ---
    let cancel = CancellationToken::new();
    let rollup = (config.rollup_interval_secs > 0).then(|| {
        info!(every_secs = config.rollup_interval_secs, "Starting rollup job");
        spawn_rollup_job(
            app_state.clone(),
            Duration::from_secs(config.rollup_interval_secs),
            cancel.clone(),
        )
    });

    // --- 5. Create the Web Router ---
    let app = build_router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    })
    .await?;

    cancel.cancel();
    if let Some(handle) = rollup {
        if let Err(e) = handle.await {
            warn!("Rollup job ended abnormally: {}", e);
        }
    }
    Ok(())
}
