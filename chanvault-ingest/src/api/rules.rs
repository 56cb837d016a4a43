//! Classification rule administration endpoints
//!
//! Rule changes take effect for new messages after a reload; already
//! stored records keep their labels until an explicit reclassify.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::rules;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Request body for POST /rules
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub keywords: Vec<String>,
    pub category_label: String,
    #[serde(default)]
    pub priority: i64,
}

/// Response for POST /rules
#[derive(Debug, Serialize)]
pub struct CreateRuleResponse {
    pub id: i64,
}

/// POST /rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> ApiResult<Json<CreateRuleResponse>> {
    if request.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(ApiError::BadRequest(
            "Rule needs at least one non-empty keyword".to_string(),
        ));
    }
    if request.category_label.trim().is_empty() {
        return Err(ApiError::BadRequest("Category label must not be empty".to_string()));
    }

    let id = rules::insert_rule(
        &state.db,
        &request.keywords,
        &request.category_label,
        request.priority,
    )
    .await?;
    state.classifier.reload().await?;

    Ok(Json(CreateRuleResponse { id }))
}

/// POST /rules/{id}/deactivate
pub async fn deactivate_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let deactivated = rules::deactivate_rule(&state.db, id).await?;
    if !deactivated {
        return Err(ApiError::NotFound(format!("Rule not found: {}", id)));
    }
    state.classifier.reload().await?;

    Ok(Json(serde_json::json!({ "deactivated": id })))
}

/// Response for POST /reclassify
#[derive(Debug, Serialize)]
pub struct ReclassifyResponse {
    pub reclassified: usize,
}

/// POST /reclassify
///
/// Re-runs classification over all stored metadata with the current
/// rule set. No media is re-fingerprinted; statistics are rebuilt to
/// reflect the new per-category counts.
pub async fn reclassify(State(state): State<AppState>) -> ApiResult<Json<ReclassifyResponse>> {
    let reclassified = state
        .pipeline
        .reclassify_all()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ReclassifyResponse { reclassified }))
}

/// Build rule administration routes
pub fn rule_routes() -> Router<AppState> {
    Router::new()
        .route("/rules", post(create_rule))
        .route("/rules/:id/deactivate", post(deactivate_rule))
        .route("/reclassify", post(reclassify))
}
