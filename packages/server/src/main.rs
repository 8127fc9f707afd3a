// Main entry point for the Rankpulse API server

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline::{
    CompetitorPipeline, MemoryStatusStore, PostgresStatusStore, StatusStore,
};
use server_core::{build_app, Config, HttpSiteScraper, OpenAiInsightGenerator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rankpulse competitor analysis API");

    let config = Config::from_env().context("Failed to load configuration")?;

    // Connect to Postgres when configured, otherwise run on the in-memory
    // store (single-node development mode; records die with the process).
    let (store, db_pool): (Arc<dyn StatusStore>, _) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            (Arc::new(PostgresStatusStore::new(pool.clone())), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory status store");
            (Arc::new(MemoryStatusStore::new()), None)
        }
    };

    let scraper = Arc::new(HttpSiteScraper::new()?);
    let generator = Arc::new(OpenAiInsightGenerator::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    )?);
    let pipeline = Arc::new(CompetitorPipeline::new(
        store,
        scraper,
        generator,
        config.pipeline,
    ));

    let app = build_app(pipeline.clone(), db_pool);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Drain in-flight jobs before exiting.
    pipeline.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
