//! Stored record persistence and search

use crate::types::{ClassificationResult, MediaKind, StoredRecord};
use chanvault_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    let item_id_str: String = row.get("item_id");
    let item_id = Uuid::parse_str(&item_id_str)
        .map_err(|e| Error::Internal(format!("Invalid UUID in database: {}", e)))?;

    let media_kind_str: String = row.get("media_kind");
    let media_kind = MediaKind::parse(&media_kind_str)
        .ok_or_else(|| Error::Internal(format!("Unknown media kind: {}", media_kind_str)))?;

    let tags_json: String = row.get("channel_tags");
    let channel_tags: Vec<String> =
        serde_json::from_str(&tags_json).unwrap_or_default();

    let categories_json: String = row.get("categories");
    let categories: ClassificationResult =
        serde_json::from_str(&categories_json).unwrap_or_default();

    let captured_at = parse_timestamp(&row.get::<String, _>("captured_at"))?;
    let stored_at = parse_timestamp(&row.get::<String, _>("stored_at"))?;

    let size_bytes: i64 = row.get("size_bytes");
    let deleted: i64 = row.get("deleted");

    Ok(StoredRecord {
        item_id,
        fingerprint: row.get("fingerprint"),
        storage_key: row.get("storage_key"),
        source_channel_id: row.get("source_channel_id"),
        source_message_id: row.get("source_message_id"),
        media_kind,
        size_bytes: size_bytes.max(0) as u64,
        file_name: row.get("file_name"),
        associated_text: row.get("associated_text"),
        channel_tags,
        categories,
        captured_at,
        stored_at,
        deleted: deleted != 0,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp in database: {}", e)))
}

/// Insert a stored record. Created exactly once per accepted item.
pub async fn insert_record(pool: &SqlitePool, record: &StoredRecord) -> Result<()> {
    let tags_json = serde_json::to_string(&record.channel_tags)
        .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;
    let categories_json = serde_json::to_string(&record.categories)
        .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO stored_records (
            item_id, fingerprint, storage_key, source_channel_id,
            source_message_id, media_kind, size_bytes, file_name,
            associated_text, channel_tags, categories, captured_at,
            stored_at, deleted
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(record.item_id.to_string())
    .bind(&record.fingerprint)
    .bind(&record.storage_key)
    .bind(&record.source_channel_id)
    .bind(record.source_message_id)
    .bind(record.media_kind.as_str())
    .bind(record.size_bytes as i64)
    .bind(&record.file_name)
    .bind(&record.associated_text)
    .bind(tags_json)
    .bind(categories_json)
    .bind(record.captured_at.to_rfc3339())
    .bind(record.stored_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a record by item id (including soft-deleted ones)
pub async fn get_record(pool: &SqlitePool, item_id: Uuid) -> Result<Option<StoredRecord>> {
    let row = sqlx::query("SELECT * FROM stored_records WHERE item_id = ?")
        .bind(item_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

/// True if a record exists for the fingerprint (used by orphan
/// reconciliation and reservation release guards)
pub async fn record_exists_for_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM stored_records WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Escape LIKE metacharacters so a search term matches literally
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Search visible records by category label or keyword, newest first.
/// `limit`/`offset` make the sequence lazy and restartable.
pub async fn search_records(
    pool: &SqlitePool,
    term: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<StoredRecord>> {
    // Category labels live inside the categories JSON; the label pattern
    // matches the serialized {"label":"..."} form exactly, while the
    // broader pattern covers text and tag keywords.
    let label_pattern = format!(
        "%\"label\":{}%",
        escape_like(&serde_json::to_string(term).unwrap_or_default())
    );
    let text_pattern = format!("%{}%", escape_like(&term.to_lowercase()));

    let rows = sqlx::query(
        r#"
        SELECT * FROM stored_records
        WHERE deleted = 0
          AND (
            categories LIKE ? ESCAPE '\'
            OR LOWER(IFNULL(associated_text, '')) LIKE ? ESCAPE '\'
            OR LOWER(channel_tags) LIKE ? ESCAPE '\'
            OR LOWER(IFNULL(file_name, '')) LIKE ? ESCAPE '\'
          )
        ORDER BY stored_at DESC, item_id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&label_pattern)
    .bind(&text_pattern)
    .bind(&text_pattern)
    .bind(&text_pattern)
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Soft delete: hide a record from queries without erasing bytes
pub async fn mark_deleted(pool: &SqlitePool, item_id: Uuid) -> Result<bool> {
    let result = sqlx::query("UPDATE stored_records SET deleted = 1 WHERE item_id = ?")
        .bind(item_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Page through visible records for reclassification
pub async fn list_records(
    pool: &SqlitePool,
    limit: u32,
    offset: u32,
) -> Result<Vec<StoredRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM stored_records WHERE deleted = 0 ORDER BY stored_at DESC, item_id DESC LIMIT ? OFFSET ?",
    )
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Replace a record's categories (reclassification after a rule change)
pub async fn update_categories(
    pool: &SqlitePool,
    item_id: Uuid,
    categories: &ClassificationResult,
) -> Result<()> {
    let categories_json = serde_json::to_string(categories)
        .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;

    sqlx::query("UPDATE stored_records SET categories = ? WHERE item_id = ?")
        .bind(categories_json)
        .bind(item_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}
