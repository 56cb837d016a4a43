//! End-to-end pipeline tests over a file-backed database
//!
//! The dedup guarantee is exercised with real concurrency here: the
//! duplicate index lives in SQLite, so the tests run against a database
//! file shared by all pool connections.

use chanvault_ingest::config::init_default_settings;
use chanvault_ingest::db::rules;
use chanvault_ingest::services::{ClassificationEngine, StatsAggregator};
use chanvault_ingest::types::{IngestOutcome, MediaKind, MediaPayload, RawMessage};
use chanvault_ingest::IngestionPipeline;
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

async fn setup(root: &Path) -> (SqlitePool, Arc<StatsAggregator>, Arc<IngestionPipeline>) {
    let pool = chanvault_ingest::db::init_database_pool(&root.join("chanvault.db"))
        .await
        .unwrap();
    init_default_settings(&pool).await.unwrap();

    let classifier = Arc::new(ClassificationEngine::new(pool.clone()).await.unwrap());
    let stats = Arc::new(StatsAggregator::new());
    let pipeline = Arc::new(IngestionPipeline::new(
        pool.clone(),
        root.to_path_buf(),
        Arc::clone(&classifier),
        Arc::clone(&stats),
    ));
    (pool, stats, pipeline)
}

fn media_message(channel: &str, message_id: i64, bytes: Vec<u8>, text: Option<&str>) -> RawMessage {
    RawMessage {
        channel_id: channel.to_string(),
        message_id,
        media: Some(MediaPayload {
            declared_kind: Some(MediaKind::Image),
            file_name: Some(format!("media-{}.jpg", message_id)),
            declared_size_bytes: Some(bytes.len() as u64),
            bytes,
        }),
        text: text.map(|t| t.to_string()),
        tags: Vec::new(),
        sent_at: Utc::now(),
    }
}

#[tokio::test]
async fn concurrent_identical_submissions_store_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, stats, pipeline) = setup(dir.path()).await;

    let payload = vec![0xA5u8; 256 * 1024];
    let mut handles = Vec::new();
    for i in 0..16i64 {
        let pipeline = Arc::clone(&pipeline);
        let bytes = payload.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .ingest(media_message(&format!("chan-{}", i % 4), i, bytes, None))
                .await
        }));
    }

    let mut stored: Vec<Uuid> = Vec::new();
    let mut duplicate_of: Vec<Uuid> = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            IngestOutcome::Stored { record } => stored.push(record.item_id),
            IngestOutcome::Duplicate { canonical_item_id } => duplicate_of.push(canonical_item_id),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(stored.len(), 1, "exactly one submission may win the reservation");
    assert_eq!(duplicate_of.len(), 15);
    assert!(duplicate_of.iter().all(|id| *id == stored[0]));

    // The blob exists exactly once under its content address
    let record_fp = {
        let records = pipeline.storage().search("media", 50, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        records[0].fingerprint.clone()
    };
    assert!(pipeline.storage().blob_path(&record_fp).exists());

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_ingested, 16);
    assert_eq!(snapshot.total_accepted, 1);
    assert_eq!(snapshot.total_duplicates, 15);
}

#[tokio::test]
async fn dedup_guarantee_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first_item = {
        let (_pool, _stats, pipeline) = setup(dir.path()).await;
        match pipeline.ingest(media_message("chan-1", 1, b"persistent".to_vec(), None)).await {
            IngestOutcome::Stored { record } => record.item_id,
            other => panic!("Expected Stored, got {:?}", other),
        }
    };

    // Fresh process state over the same database and storage root
    let (pool, stats, pipeline) = setup(dir.path()).await;
    stats.rebuild(&pool).await.unwrap();

    match pipeline.ingest(media_message("chan-2", 2, b"persistent".to_vec(), None)).await {
        IngestOutcome::Duplicate { canonical_item_id } => {
            assert_eq!(canonical_item_id, first_item)
        }
        other => panic!("Expected Duplicate, got {:?}", other),
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_accepted, 1);
    assert_eq!(snapshot.total_duplicates, 1);
}

#[tokio::test]
async fn keyword_rule_drives_category_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, stats, pipeline) = setup(dir.path()).await;

    rules::insert_rule(
        &pool,
        &["cat".to_string(), "dog".to_string(), "pet".to_string()],
        "animals",
        5,
    )
    .await
    .unwrap();

    // Rules were inserted after engine startup
    pipeline.reclassify_all().await.unwrap();

    let outcome = pipeline
        .ingest(media_message("chan-1", 1, b"cat video bytes".to_vec(), Some("funny cat video")))
        .await;
    let record = match outcome {
        IngestOutcome::Stored { record } => record,
        other => panic!("Expected Stored, got {:?}", other),
    };
    assert_eq!(record.categories.labels[0].label, "animals");

    // Searchable by category label and by text keyword
    let by_label = pipeline.storage().search("animals", 10, 0).await.unwrap();
    assert_eq!(by_label.len(), 1);
    assert_eq!(by_label[0].item_id, record.item_id);

    let by_text = pipeline.storage().search("funny", 10, 0).await.unwrap();
    assert_eq!(by_text.len(), 1);

    assert_eq!(stats.snapshot().per_category_counts.get("animals"), Some(&1));
}

#[tokio::test]
async fn mixed_outcomes_conserve_totals() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, stats, pipeline) = setup(dir.path()).await;

    // Accepted
    pipeline.ingest(media_message("chan-1", 1, b"one".to_vec(), None)).await;
    // Duplicate
    pipeline.ingest(media_message("chan-2", 2, b"one".to_vec(), None)).await;
    // Ignored (no media payload)
    pipeline
        .ingest(RawMessage {
            channel_id: "chan-1".to_string(),
            message_id: 3,
            media: None,
            text: Some("plain text".to_string()),
            tags: Vec::new(),
            sent_at: Utc::now(),
        })
        .await;
    // Oversize rejection
    chanvault_common::db::set_setting(&pool, "max_blob_size_bytes", "4").await.unwrap();
    let oversize = pipeline.ingest(media_message("chan-1", 4, vec![1u8; 64], None)).await;
    assert!(matches!(oversize, IngestOutcome::Failed { reason } if reason == "PAYLOAD_TOO_LARGE"));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_ingested, 4);
    assert_eq!(
        snapshot.total_ingested,
        snapshot.total_accepted
            + snapshot.total_duplicates
            + snapshot.total_failed
            + snapshot.total_ignored
            + snapshot.total_oversize
    );
    assert_eq!(snapshot.total_oversize, 1);
}
