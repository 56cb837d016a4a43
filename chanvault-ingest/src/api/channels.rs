//! Channel administration endpoints

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::AppState;

/// POST /channels/{channel_id}/close
///
/// Stops admitting new messages from a channel. In-flight messages for
/// the channel complete normally; their stored records are retained.
pub async fn close_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<serde_json::Value> {
    state.pipeline.close_channel(&channel_id).await;
    Json(serde_json::json!({ "closed": channel_id }))
}

/// Build channel administration routes
pub fn channel_routes() -> Router<AppState> {
    Router::new().route("/channels/:channel_id/close", post(close_channel))
}
