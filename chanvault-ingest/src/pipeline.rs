//! Ingestion pipeline
//!
//! Drives each raw message through the per-message state machine:
//!
//! `Received → Extracted → Fingerprinted → {DuplicateRejected | Classified → Stored}`
//!
//! Terminal states are `Stored`, `Duplicate`, `Ignored` and `Failed`.
//! Messages from different channels are processed in parallel; the
//! duplicate index serializes processing of the same fingerprint. Every
//! terminal state updates the statistics aggregator exactly once, and a
//! failure for one message never blocks processing of the next.

use crate::config::PipelineSettings;
use crate::error::{IngestError, IngestResult};
use crate::services::stats::IngestOutcomeKind;
use crate::services::{
    ClassificationEngine, DuplicateIndex, Fingerprinter, ReserveOutcome, StatsAggregator,
    StorageCoordinator,
};
use crate::types::{IngestOutcome, MediaItem, MediaKind, RawMessage};
use crate::utils::retry_with_backoff;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reason code for a reservation still inside its release cooldown
pub const REASON_RESERVATION_COOLDOWN: &str = "RESERVATION_COOLDOWN";

/// Orchestrates extraction, fingerprinting, dedup, classification and
/// storage for incoming messages
pub struct IngestionPipeline {
    db: SqlitePool,
    storage: StorageCoordinator,
    dedup: DuplicateIndex,
    classifier: Arc<ClassificationEngine>,
    stats: Arc<StatsAggregator>,
    /// Per-channel admission gates. A cancelled token stops admitting
    /// new messages for that channel; in-flight items complete.
    channel_gates: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl IngestionPipeline {
    pub fn new(
        db: SqlitePool,
        storage_root: PathBuf,
        classifier: Arc<ClassificationEngine>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            storage: StorageCoordinator::new(db.clone(), storage_root),
            dedup: DuplicateIndex::new(db.clone()),
            db,
            classifier,
            stats,
            channel_gates: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn storage(&self) -> &StorageCoordinator {
        &self.storage
    }

    pub fn dedup(&self) -> &DuplicateIndex {
        &self.dedup
    }

    /// Run one message through the state machine. Infallible from the
    /// caller's perspective: every internal error maps to a terminal
    /// outcome, and statistics are updated exactly once.
    pub async fn ingest(&self, msg: RawMessage) -> IngestOutcome {
        let channel_id = msg.channel_id.clone();
        let message_id = msg.message_id;

        let outcome = match self.process(msg).await {
            Ok(outcome) => outcome,
            Err(IngestError::UnsupportedMediaKind) => IngestOutcome::Ignored,
            Err(err) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    message_id,
                    reason = err.reason_code(),
                    error = %err,
                    "Message processing failed"
                );
                IngestOutcome::Failed { reason: err.reason_code().to_string() }
            }
        };

        match &outcome {
            IngestOutcome::Stored { record } => {
                self.stats.record(IngestOutcomeKind::Accepted {
                    category_labels: record.categories.label_names(),
                });
            }
            IngestOutcome::Duplicate { .. } => {
                self.stats.record(IngestOutcomeKind::Duplicate);
            }
            IngestOutcome::Ignored => {
                self.stats.record(IngestOutcomeKind::Ignored);
            }
            IngestOutcome::Failed { reason } if reason == "PAYLOAD_TOO_LARGE" => {
                self.stats.record(IngestOutcomeKind::OversizeRejected);
            }
            IngestOutcome::Failed { reason } => {
                self.stats.record(IngestOutcomeKind::Failed {
                    reason_code: reason.clone(),
                });
            }
        }

        outcome
    }

    async fn process(&self, msg: RawMessage) -> IngestResult<IngestOutcome> {
        // Settings are re-read per message so config changes apply to
        // new arrivals without touching in-flight ones
        let settings = PipelineSettings::load(&self.db)
            .await
            .map_err(|e| IngestError::IndexUnavailable(e.to_string()))?;

        if self.is_channel_closed(&msg.channel_id).await {
            tracing::debug!(channel_id = %msg.channel_id, "Channel closed, message not admitted");
            return Ok(IngestOutcome::Ignored);
        }

        // Received → Extracted
        let item = extract_media_item(msg)?;

        // Extracted → Fingerprinted
        let fingerprinter = Fingerprinter::new(settings.perceptual_enabled);
        let fingerprint = fingerprinter.fingerprint(&item).await?;

        // Fingerprinted → reservation
        let perceptual_threshold =
            settings.perceptual_enabled.then_some(settings.similarity_threshold);
        let reserve_outcome = retry_with_backoff(
            "duplicate index reserve",
            settings.reserve_retry_attempts,
            || {
                self.dedup.reserve(
                    &fingerprint,
                    item.item_id,
                    perceptual_threshold,
                    settings.release_cooldown_seconds,
                )
            },
        )
        .await?;

        match reserve_outcome {
            ReserveOutcome::Duplicate { canonical_item_id } => {
                tracing::info!(
                    channel_id = %item.source_channel_id,
                    message_id = item.source_message_id,
                    canonical = %canonical_item_id,
                    "Duplicate content rejected"
                );
                return Ok(IngestOutcome::Duplicate { canonical_item_id });
            }
            ReserveOutcome::CoolingDown => {
                return Ok(IngestOutcome::Failed {
                    reason: REASON_RESERVATION_COOLDOWN.to_string(),
                });
            }
            ReserveOutcome::Accepted => {}
        }

        // Accepted → Classified (empty result is not an error)
        let categories =
            self.classifier.classify(item.associated_text.as_deref(), &item.channel_tags);

        // Classified → Stored, with bounded retry for transient storage
        // failures. On exhaustion (or policy rejection) the reservation
        // is released together with the Failed outcome so a later retry
        // of the same content can still succeed.
        let commit_result = retry_with_backoff(
            "storage commit",
            settings.commit_retry_attempts,
            || self.storage.commit(&item, &fingerprint, categories.clone(), settings.max_blob_size_bytes),
        )
        .await;

        match commit_result {
            Ok(record) => Ok(IngestOutcome::Stored { record }),
            Err(err) => {
                // The release is retried too: a fingerprint left reserved
                // with no stored record would turn every later submission
                // of this content into a duplicate of nothing. The commit
                // error stays the surfaced outcome either way.
                let released = retry_with_backoff(
                    "reservation release",
                    settings.commit_retry_attempts,
                    || {
                        self.dedup.release(
                            &fingerprint.content,
                            item.item_id,
                            settings.release_cooldown_seconds,
                        )
                    },
                )
                .await;
                if let Err(release_err) = released {
                    tracing::error!(
                        fingerprint = %fingerprint.content,
                        item_id = %item.item_id,
                        error = %release_err,
                        "Failed to release reservation after commit failure"
                    );
                }
                Err(err)
            }
        }
    }

    /// Stop admitting messages for a channel. In-flight items for the
    /// channel are allowed to complete to preserve storage atomicity.
    pub async fn close_channel(&self, channel_id: &str) {
        let mut gates = self.channel_gates.write().await;
        gates
            .entry(channel_id.to_string())
            .or_insert_with(CancellationToken::new)
            .cancel();
        tracing::info!(channel_id = %channel_id, "Channel closed for ingestion");
    }

    async fn is_channel_closed(&self, channel_id: &str) -> bool {
        self.channel_gates
            .read()
            .await
            .get(channel_id)
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    /// Re-run classification over stored metadata after a rule change.
    /// No re-fingerprinting happens; per-category counts are refreshed
    /// afterwards. Returns the number of reclassified records.
    pub async fn reclassify_all(&self) -> IngestResult<usize> {
        self.classifier.reload().await.map_err(IngestError::Common)?;

        const PAGE_SIZE: u32 = 100;
        let mut offset = 0;
        let mut updated = 0;

        loop {
            let page = crate::db::records::list_records(&self.db, PAGE_SIZE, offset)
                .await
                .map_err(IngestError::Common)?;
            if page.is_empty() {
                break;
            }

            for record in &page {
                let categories = self
                    .classifier
                    .classify(record.associated_text.as_deref(), &record.channel_tags);
                crate::db::records::update_categories(&self.db, record.item_id, &categories)
                    .await
                    .map_err(IngestError::Common)?;
                updated += 1;
            }

            offset += PAGE_SIZE;
        }

        // Only the per-category tallies change; failure/ignore history
        // is not a casualty of a classification-only operation
        self.stats.refresh_categories(&self.db).await.map_err(IngestError::Common)?;
        tracing::info!(records = updated, "Reclassification complete");
        Ok(updated)
    }
}

/// Received → Extracted: build the transient MediaItem or reject the
/// message. Kind is sniffed from the payload bytes, falling back to the
/// transport layer's declaration.
fn extract_media_item(msg: RawMessage) -> IngestResult<MediaItem> {
    let media = msg.media.ok_or(IngestError::UnsupportedMediaKind)?;

    if let Some(declared) = media.declared_size_bytes {
        if declared != media.bytes.len() as u64 {
            return Err(IngestError::UnreadableContent(format!(
                "partial payload: declared {} bytes, got {}",
                declared,
                media.bytes.len()
            )));
        }
    }

    let media_kind = sniff_media_kind(&media.bytes)
        .or(media.declared_kind)
        .ok_or(IngestError::UnsupportedMediaKind)?;

    let size_bytes = media.bytes.len() as u64;
    Ok(MediaItem {
        item_id: Uuid::new_v4(),
        source_channel_id: msg.channel_id,
        source_message_id: msg.message_id,
        media_kind,
        size_bytes,
        bytes: Arc::new(media.bytes),
        file_name: media.file_name,
        associated_text: msg.text,
        channel_tags: msg.tags,
        captured_at: msg.sent_at,
    })
}

fn sniff_media_kind(bytes: &[u8]) -> Option<MediaKind> {
    infer::get(bytes).and_then(|kind| match kind.matcher_type() {
        infer::MatcherType::Image => Some(MediaKind::Image),
        infer::MatcherType::Video => Some(MediaKind::Video),
        _ => None,
    })
}
