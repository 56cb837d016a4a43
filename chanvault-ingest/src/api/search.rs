//! Stored record search endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::types::StoredRecord;
use crate::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// Query parameters for GET /search
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Category label or keyword to match
    pub q: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Search response page
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub records: Vec<StoredRecord>,
    pub limit: u32,
    pub offset: u32,
}

/// GET /search?q=...&limit=...&offset=...
///
/// Matches category labels and text keywords over visible records,
/// newest first. Paged so callers can stream large result sets.
pub async fn search_records(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let records = state
        .pipeline
        .storage()
        .search(&params.q, limit, offset)
        .await
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;

    Ok(Json(SearchResponse { records, limit, offset }))
}

/// Build search routes
pub fn search_routes() -> Router<AppState> {
    Router::new().route("/search", get(search_records))
}
