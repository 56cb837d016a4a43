//! Core domain types for the ingestion pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Media kind accepted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(MediaKind::Video),
            "image" => Some(MediaKind::Image),
            _ => None,
        }
    }
}

/// Media payload attached to a raw message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Kind declared by the transport layer, if any (payload bytes are
    /// still sniffed; the declaration is a fallback)
    pub declared_kind: Option<MediaKind>,
    /// Original file name, if the channel provided one
    pub file_name: Option<String>,
    /// Size the transport layer claims the payload has; a mismatch with
    /// the delivered bytes means a partial transfer
    pub declared_size_bytes: Option<u64>,
    /// Raw payload bytes
    pub bytes: Vec<u8>,
}

/// Raw message delivered by the channel-watcher layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub channel_id: String,
    pub message_id: i64,
    pub media: Option<MediaPayload>,
    pub text: Option<String>,
    /// Channel-provided tags, matched by classification rules alongside
    /// the message text
    #[serde(default)]
    pub tags: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

/// Candidate media item extracted from a raw message.
/// Immutable once created; owned by the pipeline during processing.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub item_id: Uuid,
    pub source_channel_id: String,
    pub source_message_id: i64,
    pub media_kind: MediaKind,
    /// Shared so hashing can run on a blocking thread without copying
    pub bytes: Arc<Vec<u8>>,
    pub size_bytes: u64,
    pub file_name: Option<String>,
    pub associated_text: Option<String>,
    pub channel_tags: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// Content-addressable fingerprint of a media item.
/// Computed once per item; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-256 hex digest of the payload bytes (the dedup key)
    pub content: String,
    /// Optional perceptual digest for near-duplicate tolerance
    /// (base64, images only, config-gated)
    pub perceptual: Option<String>,
}

/// One category label with its confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub label: String,
    /// Normalized to [0, 1]
    pub confidence: f64,
}

/// Classification output: labels ordered by descending confidence,
/// ties broken by rule declaration order. May be empty (uncategorized).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub labels: Vec<CategoryScore>,
}

impl ClassificationResult {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.label.clone()).collect()
    }
}

/// Durable record of an accepted, classified media item.
/// Raw metadata fields are retained alongside the blob reference so
/// categories can be recomputed after a rule-set change without
/// re-fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub item_id: Uuid,
    pub fingerprint: String,
    /// Content-addressed blob key (relative to the storage root)
    pub storage_key: String,
    pub source_channel_id: String,
    pub source_message_id: i64,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    pub file_name: Option<String>,
    pub associated_text: Option<String>,
    pub channel_tags: Vec<String>,
    pub categories: ClassificationResult,
    pub captured_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Record owned by the duplicate index: at most one canonical item per
/// fingerprint, duplicate_count monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub fingerprint: String,
    pub canonical_item_id: Uuid,
    pub perceptual_hash: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub duplicate_count: i64,
    /// Set when the reservation was released after a failed commit;
    /// cleared when a later ingest takes the fingerprint over
    pub released_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of the per-message state machine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Item accepted as canonical and durably stored
    Stored { record: StoredRecord },
    /// Item is a duplicate of an earlier canonical item
    Duplicate { canonical_item_id: Uuid },
    /// Message carried no usable media; dropped without a record
    Ignored,
    /// Processing failed; only the reason code is surfaced
    Failed { reason: String },
}

/// Point-in-time statistics snapshot.
/// Derived state, rebuildable from the stored record set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_ingested: u64,
    pub total_accepted: u64,
    pub total_duplicates: u64,
    pub total_failed: u64,
    pub total_ignored: u64,
    /// Oversized payload rejections, counted separately from failures
    pub total_oversize: u64,
    pub per_category_counts: BTreeMap<String, u64>,
}
