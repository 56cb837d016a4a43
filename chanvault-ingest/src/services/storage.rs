//! Durable storage for accepted media
//!
//! Blobs live in content-addressed storage keyed by fingerprint, which
//! makes the "bytes already present" check itself idempotent. The blob
//! write is a temp-file write plus fsync plus rename, and the record row
//! is inserted only after the rename: a crash between the two leaves an
//! orphaned blob (reclaimed by reconciliation), never a record pointing
//! at missing bytes.

use crate::db::records;
use crate::error::{IngestError, IngestResult};
use crate::types::{ClassificationResult, Fingerprint, MediaItem, StoredRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Storage coordinator: blob store + stored_records table
#[derive(Clone)]
pub struct StorageCoordinator {
    db: SqlitePool,
    root: PathBuf,
}

impl StorageCoordinator {
    pub fn new(db: SqlitePool, root: PathBuf) -> Self {
        Self { db, root }
    }

    /// Content-addressed blob key for a fingerprint
    pub fn storage_key(fingerprint: &str) -> String {
        let shard = if fingerprint.len() >= 2 { &fingerprint[..2] } else { "00" };
        format!("blobs/{}/{}", shard, fingerprint)
    }

    /// Absolute path of a blob
    pub fn blob_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join(Self::storage_key(fingerprint))
    }

    /// Durably store an accepted item: blob bytes plus its record.
    ///
    /// Called only after the duplicate index granted `Accepted`.
    /// Oversized payloads fail with `PayloadTooLarge` and nothing is
    /// written.
    pub async fn commit(
        &self,
        item: &MediaItem,
        fingerprint: &Fingerprint,
        categories: ClassificationResult,
        max_blob_size_bytes: u64,
    ) -> IngestResult<StoredRecord> {
        if item.size_bytes > max_blob_size_bytes {
            return Err(IngestError::PayloadTooLarge {
                size_bytes: item.size_bytes,
                max_bytes: max_blob_size_bytes,
            });
        }

        self.write_blob(&fingerprint.content, Arc::clone(&item.bytes)).await?;

        let record = StoredRecord {
            item_id: item.item_id,
            fingerprint: fingerprint.content.clone(),
            storage_key: Self::storage_key(&fingerprint.content),
            source_channel_id: item.source_channel_id.clone(),
            source_message_id: item.source_message_id,
            media_kind: item.media_kind,
            size_bytes: item.size_bytes,
            file_name: item.file_name.clone(),
            associated_text: item.associated_text.clone(),
            channel_tags: item.channel_tags.clone(),
            categories,
            captured_at: item.captured_at,
            stored_at: Utc::now(),
            deleted: false,
        };

        records::insert_record(&self.db, &record)
            .await
            .map_err(|e| IngestError::StorageWrite(e.to_string()))?;

        tracing::info!(
            item_id = %record.item_id,
            fingerprint = %record.fingerprint,
            size_bytes = record.size_bytes,
            "Stored record committed"
        );

        Ok(record)
    }

    /// Write the blob if it is not already present (temp + fsync + rename)
    async fn write_blob(&self, fingerprint: &str, bytes: Arc<Vec<u8>>) -> IngestResult<()> {
        let final_path = self.blob_path(fingerprint);
        if final_path.exists() {
            // Content-addressed: identical bytes are already durable
            tracing::debug!(fingerprint = %fingerprint, "Blob already present, skipping write");
            return Ok(());
        }

        let tmp_path = final_path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;

            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            drop(file);

            std::fs::rename(&tmp_path, &final_path)
        })
        .await
        .map_err(|e| IngestError::StorageWrite(format!("blob write task failed: {}", e)))?
        .map_err(|e| IngestError::StorageWrite(e.to_string()))?;

        Ok(())
    }

    /// Soft delete: hide a record from queries without erasing bytes
    pub async fn soft_delete(&self, item_id: Uuid) -> IngestResult<bool> {
        records::mark_deleted(&self.db, item_id)
            .await
            .map_err(IngestError::Common)
    }

    /// Search visible records by category label or keyword, newest first
    pub async fn search(
        &self,
        term: &str,
        limit: u32,
        offset: u32,
    ) -> IngestResult<Vec<StoredRecord>> {
        records::search_records(&self.db, term, limit, offset)
            .await
            .map_err(IngestError::Common)
    }

    /// Reclaim blobs with no stored record.
    ///
    /// A crash between blob rename and record insert leaves an orphan;
    /// the age guard keeps in-flight commits out of the sweep. Returns
    /// the number of orphans removed.
    pub async fn reconcile_orphans(&self, min_age: Duration) -> IngestResult<usize> {
        let blob_root = self.root.join("blobs");
        if !blob_root.exists() {
            return Ok(0);
        }

        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        let mut shards = tokio::fs::read_dir(&blob_root)
            .await
            .map_err(|e| IngestError::StorageWrite(e.to_string()))?;
        while let Some(shard) = next_entry(&mut shards).await? {
            if !shard.path().is_dir() {
                continue;
            }
            let mut blobs = tokio::fs::read_dir(shard.path())
                .await
                .map_err(|e| IngestError::StorageWrite(e.to_string()))?;
            while let Some(blob) = next_entry(&mut blobs).await? {
                let path = blob.path();
                if is_old_enough(&path, min_age) {
                    let name = blob.file_name().to_string_lossy().to_string();
                    candidates.push((name, path));
                }
            }
        }

        let mut removed = 0;
        for (fingerprint, path) in candidates {
            // Temp files left behind by interrupted writes are orphans too
            let is_temp = fingerprint.contains(".tmp.");
            let has_record = if is_temp {
                false
            } else {
                records::record_exists_for_fingerprint(&self.db, &fingerprint)
                    .await
                    .map_err(IngestError::Common)?
            };

            if !has_record {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| IngestError::StorageWrite(e.to_string()))?;
                tracing::info!(fingerprint = %fingerprint, "Reclaimed orphaned blob");
                removed += 1;
            }
        }

        Ok(removed)
    }
}

async fn next_entry(
    dir: &mut tokio::fs::ReadDir,
) -> IngestResult<Option<tokio::fs::DirEntry>> {
    dir.next_entry()
        .await
        .map_err(|e| IngestError::StorageWrite(e.to_string()))
}

fn is_old_enough(path: &Path, min_age: Duration) -> bool {
    path.metadata()
        .and_then(|m| m.modified())
        .map(|mtime| {
            SystemTime::now()
                .duration_since(mtime)
                .map(|age| age >= min_age)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::MediaKind;

    fn item(bytes: &[u8], channel: &str) -> MediaItem {
        MediaItem {
            item_id: Uuid::new_v4(),
            source_channel_id: channel.to_string(),
            source_message_id: 1,
            media_kind: MediaKind::Image,
            size_bytes: bytes.len() as u64,
            bytes: Arc::new(bytes.to_vec()),
            file_name: Some("pic.jpg".to_string()),
            associated_text: Some("a picture".to_string()),
            channel_tags: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    fn fp(content: &str) -> Fingerprint {
        Fingerprint { content: content.to_string(), perceptual: None }
    }

    #[tokio::test]
    async fn commit_writes_blob_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        let media = item(b"payload bytes", "chan-1");
        let record = storage
            .commit(&media, &fp("ab1234"), ClassificationResult::default(), 1024)
            .await
            .unwrap();

        assert_eq!(record.storage_key, "blobs/ab/ab1234");
        let blob = storage.blob_path("ab1234");
        assert_eq!(std::fs::read(&blob).unwrap(), b"payload bytes");

        let loaded = records::get_record(&storage.db, record.item_id).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        let media = item(&[0u8; 200], "chan-1");
        let err = storage
            .commit(&media, &fp("cd5678"), ClassificationResult::default(), 100)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::PayloadTooLarge { size_bytes: 200, max_bytes: 100 }));
        assert!(!storage.blob_path("cd5678").exists());
        assert!(!records::record_exists_for_fingerprint(&storage.db, "cd5678").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_blob_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        storage.write_blob("ef9999", Arc::new(b"same".to_vec())).await.unwrap();
        storage.write_blob("ef9999", Arc::new(b"same".to_vec())).await.unwrap();

        assert_eq!(std::fs::read(storage.blob_path("ef9999")).unwrap(), b"same");
    }

    #[tokio::test]
    async fn orphaned_blob_is_reclaimed_but_committed_blob_stays() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        // Committed item: blob + record
        let media = item(b"kept", "chan-1");
        storage
            .commit(&media, &fp("11aaaa"), ClassificationResult::default(), 1024)
            .await
            .unwrap();

        // Simulated crash after blob write, before record insert
        storage.write_blob("22bbbb", Arc::new(b"orphan".to_vec())).await.unwrap();

        let removed = storage.reconcile_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(storage.blob_path("11aaaa").exists());
        assert!(!storage.blob_path("22bbbb").exists());
    }

    #[tokio::test]
    async fn young_blobs_survive_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        storage.write_blob("33cccc", Arc::new(b"in flight".to_vec())).await.unwrap();

        let removed = storage.reconcile_orphans(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(storage.blob_path("33cccc").exists());
    }

    #[tokio::test]
    async fn soft_delete_hides_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageCoordinator::new(test_pool().await, dir.path().to_path_buf());

        let media = item(b"to hide", "chan-1");
        let record = storage
            .commit(&media, &fp("44dddd"), ClassificationResult::default(), 1024)
            .await
            .unwrap();

        assert_eq!(storage.search("picture", 10, 0).await.unwrap().len(), 1);
        assert!(storage.soft_delete(record.item_id).await.unwrap());
        assert!(storage.search("picture", 10, 0).await.unwrap().is_empty());

        // Bytes are not erased
        assert!(storage.blob_path("44dddd").exists());
    }
}
