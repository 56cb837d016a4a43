//! Running ingestion statistics
//!
//! Process-wide counters with an explicit atomic-increment contract:
//! `record` calls are linearizable (counts are never lost under
//! concurrency) while `snapshot` reads are eventually consistent with
//! in-flight ingestion, so no global lock is held. Stats are derived
//! state, rebuildable from the stored record set.

use crate::types::StatsSnapshot;
use chanvault_common::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Bounded history of recent failure reason codes
const RECENT_FAILURE_CAPACITY: usize = 100;

/// Terminal outcome reported to the aggregator, exactly once per message
#[derive(Debug, Clone)]
pub enum IngestOutcomeKind {
    Accepted { category_labels: Vec<String> },
    Duplicate,
    Failed { reason_code: String },
    Ignored,
    /// Oversized payload rejection, counted separately from failures
    OversizeRejected,
}

/// One recent failure entry
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentFailure {
    pub reason_code: String,
    pub at: DateTime<Utc>,
}

/// Concurrency-safe counter store
#[derive(Default)]
pub struct StatsAggregator {
    ingested: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    oversize: AtomicU64,
    per_category: Mutex<BTreeMap<String, u64>>,
    recent_failures: Mutex<VecDeque<RecentFailure>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal outcome
    pub fn record(&self, outcome: IngestOutcomeKind) {
        self.ingested.fetch_add(1, Ordering::SeqCst);
        match outcome {
            IngestOutcomeKind::Accepted { category_labels } => {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                let mut per_category =
                    self.per_category.lock().expect("category lock poisoned");
                for label in category_labels {
                    *per_category.entry(label).or_insert(0) += 1;
                }
            }
            IngestOutcomeKind::Duplicate => {
                self.duplicates.fetch_add(1, Ordering::SeqCst);
            }
            IngestOutcomeKind::Failed { reason_code } => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                let mut recent =
                    self.recent_failures.lock().expect("failures lock poisoned");
                if recent.len() == RECENT_FAILURE_CAPACITY {
                    recent.pop_front();
                }
                recent.push_back(RecentFailure {
                    reason_code,
                    at: Utc::now(),
                });
            }
            IngestOutcomeKind::Ignored => {
                self.ignored.fetch_add(1, Ordering::SeqCst);
            }
            IngestOutcomeKind::OversizeRejected => {
                self.oversize.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Point-in-time snapshot (eventually consistent with in-flight work)
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_ingested: self.ingested.load(Ordering::SeqCst),
            total_accepted: self.accepted.load(Ordering::SeqCst),
            total_duplicates: self.duplicates.load(Ordering::SeqCst),
            total_failed: self.failed.load(Ordering::SeqCst),
            total_ignored: self.ignored.load(Ordering::SeqCst),
            total_oversize: self.oversize.load(Ordering::SeqCst),
            per_category_counts: self
                .per_category
                .lock()
                .expect("category lock poisoned")
                .clone(),
        }
    }

    /// Reason codes of recent failures, newest last
    pub fn recent_failures(&self) -> Vec<RecentFailure> {
        self.recent_failures
            .lock()
            .expect("failures lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Recompute only the per-category counts from the stored record
    /// set. Used after reclassification; outcome counters (failed,
    /// ignored, oversize) keep their in-process history.
    pub async fn refresh_categories(&self, pool: &SqlitePool) -> Result<()> {
        let (_, per_category) = load_stored_counts(pool).await?;
        *self.per_category.lock().expect("category lock poisoned") = per_category;
        Ok(())
    }

    /// Rebuild accepted and per-category counts from the stored record
    /// set, and duplicate counts from the duplicate index. Startup
    /// recovery only.
    ///
    /// Failure and ignore counts are in-process tallies with no durable
    /// source, so a rebuild restarts them at zero; total_ingested then
    /// reflects the durable outcomes only.
    pub async fn rebuild(&self, pool: &SqlitePool) -> Result<()> {
        let (accepted, per_category) = load_stored_counts(pool).await?;
        let duplicates: i64 = sqlx::query_scalar(
            "SELECT IFNULL(SUM(duplicate_count), 0) FROM duplicate_records",
        )
        .fetch_one(pool)
        .await?;
        let duplicates = duplicates.max(0) as u64;

        self.accepted.store(accepted, Ordering::SeqCst);
        self.duplicates.store(duplicates, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.ignored.store(0, Ordering::SeqCst);
        self.oversize.store(0, Ordering::SeqCst);
        self.ingested.store(accepted + duplicates, Ordering::SeqCst);
        *self.per_category.lock().expect("category lock poisoned") = per_category;

        tracing::info!(accepted, duplicates, "Statistics rebuilt from stored records");
        Ok(())
    }
}

/// Visible-record count and per-category tally from the stored record set
async fn load_stored_counts(pool: &SqlitePool) -> Result<(u64, BTreeMap<String, u64>)> {
    let rows = sqlx::query("SELECT categories FROM stored_records WHERE deleted = 0")
        .fetch_all(pool)
        .await?;

    let mut per_category: BTreeMap<String, u64> = BTreeMap::new();
    for row in &rows {
        let categories_json: String = row.get("categories");
        let categories: crate::types::ClassificationResult =
            serde_json::from_str(&categories_json).unwrap_or_default();
        for label in categories.labels {
            *per_category.entry(label.label).or_insert(0) += 1;
        }
    }

    Ok((rows.len() as u64, per_category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_are_conserved_across_outcomes() {
        let stats = StatsAggregator::new();
        stats.record(IngestOutcomeKind::Accepted {
            category_labels: vec!["animals".to_string()],
        });
        stats.record(IngestOutcomeKind::Duplicate);
        stats.record(IngestOutcomeKind::Failed { reason_code: "STORAGE_WRITE_ERROR".to_string() });
        stats.record(IngestOutcomeKind::Ignored);
        stats.record(IngestOutcomeKind::OversizeRejected);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_ingested, 5);
        assert_eq!(
            snapshot.total_ingested,
            snapshot.total_accepted
                + snapshot.total_duplicates
                + snapshot.total_failed
                + snapshot.total_ignored
                + snapshot.total_oversize
        );
        assert_eq!(snapshot.per_category_counts.get("animals"), Some(&1));
    }

    #[test]
    fn recent_failures_keep_reason_codes() {
        let stats = StatsAggregator::new();
        stats.record(IngestOutcomeKind::Failed { reason_code: "UNREADABLE_CONTENT".to_string() });
        stats.record(IngestOutcomeKind::Failed { reason_code: "INDEX_UNAVAILABLE".to_string() });

        let failures = stats.recent_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].reason_code, "UNREADABLE_CONTENT");
        assert_eq!(failures[1].reason_code, "INDEX_UNAVAILABLE");
    }

    #[test]
    fn recent_failures_are_bounded() {
        let stats = StatsAggregator::new();
        for _ in 0..(RECENT_FAILURE_CAPACITY + 10) {
            stats.record(IngestOutcomeKind::Failed { reason_code: "STORAGE_WRITE_ERROR".to_string() });
        }
        assert_eq!(stats.recent_failures().len(), RECENT_FAILURE_CAPACITY);
    }

    #[tokio::test]
    async fn concurrent_records_lose_no_counts() {
        let stats = Arc::new(StatsAggregator::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    stats.record(IngestOutcomeKind::Accepted {
                        category_labels: vec!["memes".to_string()],
                    });
                } else {
                    stats.record(IngestOutcomeKind::Duplicate);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_ingested, 50);
        assert_eq!(snapshot.total_accepted, 25);
        assert_eq!(snapshot.total_duplicates, 25);
        assert_eq!(snapshot.per_category_counts.get("memes"), Some(&25));
    }

    #[tokio::test]
    async fn refresh_categories_keeps_outcome_counters() {
        use crate::db::{records, test_pool};
        use crate::types::{CategoryScore, ClassificationResult, MediaKind, StoredRecord};
        use uuid::Uuid;

        let pool = test_pool().await;
        let record = StoredRecord {
            item_id: Uuid::new_v4(),
            fingerprint: "fp-refresh".to_string(),
            storage_key: "blobs/fp/fp-refresh".to_string(),
            source_channel_id: "chan-1".to_string(),
            source_message_id: 1,
            media_kind: MediaKind::Image,
            size_bytes: 10,
            file_name: None,
            associated_text: None,
            channel_tags: Vec::new(),
            categories: ClassificationResult {
                labels: vec![CategoryScore { label: "memes".to_string(), confidence: 0.7 }],
            },
            captured_at: Utc::now(),
            stored_at: Utc::now(),
            deleted: false,
        };
        records::insert_record(&pool, &record).await.unwrap();

        let stats = StatsAggregator::new();
        stats.record(IngestOutcomeKind::Failed { reason_code: "UNREADABLE_CONTENT".to_string() });
        stats.record(IngestOutcomeKind::Ignored);
        stats.record(IngestOutcomeKind::OversizeRejected);

        stats.refresh_categories(&pool).await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.per_category_counts.get("memes"), Some(&1));
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.total_ignored, 1);
        assert_eq!(snapshot.total_oversize, 1);
        assert_eq!(stats.recent_failures().len(), 1);
    }

    #[tokio::test]
    async fn rebuild_recovers_accepted_and_category_counts() {
        use crate::db::{records, test_pool};
        use crate::types::{CategoryScore, ClassificationResult, MediaKind, StoredRecord};
        use uuid::Uuid;

        let pool = test_pool().await;
        let record = StoredRecord {
            item_id: Uuid::new_v4(),
            fingerprint: "fp-rebuild".to_string(),
            storage_key: "blobs/fp/fp-rebuild".to_string(),
            source_channel_id: "chan-1".to_string(),
            source_message_id: 1,
            media_kind: MediaKind::Image,
            size_bytes: 10,
            file_name: None,
            associated_text: None,
            channel_tags: Vec::new(),
            categories: ClassificationResult {
                labels: vec![CategoryScore { label: "animals".to_string(), confidence: 0.9 }],
            },
            captured_at: Utc::now(),
            stored_at: Utc::now(),
            deleted: false,
        };
        records::insert_record(&pool, &record).await.unwrap();

        let stats = StatsAggregator::new();
        stats.rebuild(&pool).await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_accepted, 1);
        assert_eq!(snapshot.per_category_counts.get("animals"), Some(&1));
    }
}
