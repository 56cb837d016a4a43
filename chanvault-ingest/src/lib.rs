//! chanvault-ingest library interface
//!
//! Exposes the ingestion pipeline and its HTTP surface for integration
//! testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, IngestError, IngestResult};
pub use crate::pipeline::IngestionPipeline;

use axum::Router;
use chrono::{DateTime, Utc};
use services::{ClassificationEngine, StatsAggregator};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Ingestion pipeline orchestrator
    pub pipeline: Arc<IngestionPipeline>,
    /// Classification rule engine (shared with the pipeline)
    pub classifier: Arc<ClassificationEngine>,
    /// Running statistics aggregator (shared with the pipeline)
    pub stats: Arc<StatsAggregator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        pipeline: Arc<IngestionPipeline>,
        classifier: Arc<ClassificationEngine>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            db,
            pipeline,
            classifier,
            stats,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingest_routes())
        .merge(api::search_routes())
        .merge(api::stats_routes())
        .merge(api::record_routes())
        .merge(api::channel_routes())
        .merge(api::rule_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
