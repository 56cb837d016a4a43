//! chanvault-ingest - Channel Media Ingestion Service
//!
//! Watches configured channels for media messages, deduplicates them by
//! content fingerprint, classifies them by keyword rules and stores the
//! accepted items durably, exposing ingestion and query endpoints over
//! HTTP REST.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chanvault_ingest::config::init_default_settings;
use chanvault_ingest::services::{ClassificationEngine, StatsAggregator};
use chanvault_ingest::{AppState, IngestionPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting chanvault-ingest (Channel Media Ingestion)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve and prepare the root folder (CLI arg > env > TOML > default)
    let cli_root = std::env::args().nth(1);
    let root_folder = chanvault_common::config::resolve_root_folder(cli_root.as_deref());
    chanvault_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = chanvault_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db_pool = chanvault_ingest::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Seed defaults only where no operator-set values exist
    init_default_settings(&db_pool).await?;
    chanvault_ingest::db::rules::seed_default_rules(&db_pool).await?;

    let classifier = Arc::new(ClassificationEngine::new(db_pool.clone()).await?);

    // Counters are in-process; recover the durable portion on startup
    let stats = Arc::new(StatsAggregator::new());
    stats.rebuild(&db_pool).await?;

    let pipeline = Arc::new(IngestionPipeline::new(
        db_pool.clone(),
        root_folder,
        Arc::clone(&classifier),
        Arc::clone(&stats),
    ));

    let state = AppState::new(db_pool, pipeline, classifier, stats);
    let app = chanvault_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:5725").await?;
    info!("Listening on http://127.0.0.1:5725");
    info!("Health check: http://127.0.0.1:5725/health");

    axum::serve(listener, app).await?;

    Ok(())
}
