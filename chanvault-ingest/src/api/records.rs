//! Stored record management endpoints

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /records/{item_id}/delete
///
/// Soft delete: the record disappears from queries, the blob bytes are
/// retained.
pub async fn delete_record(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state
        .pipeline
        .storage()
        .soft_delete(item_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if !deleted {
        return Err(ApiError::NotFound(format!("Record not found: {}", item_id)));
    }

    Ok(Json(serde_json::json!({ "deleted": item_id })))
}

/// Query parameters for orphan reconciliation
#[derive(Debug, Deserialize)]
pub struct ReconcileParams {
    /// Minimum blob age before it is considered orphaned; keeps
    /// in-flight commits out of the sweep
    pub min_age_seconds: Option<u64>,
}

const DEFAULT_MIN_AGE_SECONDS: u64 = 3600;

/// Reconciliation response
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub orphans_removed: usize,
}

/// POST /maintenance/reconcile
///
/// Sweeps blobs with no stored record (crash leftovers) from the
/// storage root.
pub async fn reconcile_orphans(
    State(state): State<AppState>,
    Query(params): Query<ReconcileParams>,
) -> ApiResult<Json<ReconcileResponse>> {
    let min_age = Duration::from_secs(params.min_age_seconds.unwrap_or(DEFAULT_MIN_AGE_SECONDS));
    let orphans_removed = state
        .pipeline
        .storage()
        .reconcile_orphans(min_age)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ReconcileResponse { orphans_removed }))
}

/// Build record management routes
pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/records/:item_id/delete", post(delete_record))
        .route("/maintenance/reconcile", post(reconcile_orphans))
}
