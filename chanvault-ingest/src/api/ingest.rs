//! Message ingestion endpoint
//!
//! Accepts one raw message per request and runs it through the full
//! pipeline. The response always carries a terminal outcome; pipeline
//! failures surface as an outcome with a reason code, never as a 5xx,
//! so a bad message cannot be confused with a broken service.

use axum::{extract::State, routing::post, Json, Router};

use crate::types::{IngestOutcome, RawMessage};
use crate::AppState;

/// POST /ingest
///
/// Processes a single raw message to a terminal outcome.
pub async fn ingest_message(
    State(state): State<AppState>,
    Json(message): Json<RawMessage>,
) -> Json<IngestOutcome> {
    let outcome = state.pipeline.ingest(message).await;

    if let IngestOutcome::Failed { reason } = &outcome {
        *state.last_error.write().await = Some(reason.clone());
    }

    Json(outcome)
}

/// Build ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/ingest", post(ingest_message))
}
