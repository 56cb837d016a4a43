//! Statistics endpoints

use axum::{extract::State, routing::get, Json, Router};

use crate::services::stats::RecentFailure;
use crate::types::StatsSnapshot;
use crate::AppState;

/// GET /stats
///
/// Point-in-time snapshot of the running counters. Eventually
/// consistent with in-flight ingestion.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// GET /stats/failures
///
/// Recent failure reason codes, newest last, bounded history.
pub async fn get_recent_failures(State(state): State<AppState>) -> Json<Vec<RecentFailure>> {
    Json(state.stats.recent_failures())
}

/// Build statistics routes
pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/stats/failures", get(get_recent_failures))
}
