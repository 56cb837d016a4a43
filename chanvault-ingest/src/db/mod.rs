//! Database access for chanvault-ingest

pub mod records;
pub mod rules;

use chanvault_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool and the ingest-specific tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = chanvault_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create ingest-specific tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Durable unit for accepted items. Raw metadata is retained so
    // categories can be recomputed from a rule change without touching
    // the blob.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stored_records (
            item_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            storage_key TEXT NOT NULL,
            source_channel_id TEXT NOT NULL,
            source_message_id INTEGER NOT NULL,
            media_kind TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            file_name TEXT,
            associated_text TEXT,
            channel_tags TEXT NOT NULL DEFAULT '[]',
            categories TEXT NOT NULL DEFAULT '[]',
            captured_at TEXT NOT NULL,
            stored_at TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stored_records_stored_at ON stored_records(stored_at)",
    )
    .execute(pool)
    .await?;

    // Authoritative duplicate index. The fingerprint primary key makes
    // reservation an atomic insert-if-absent that holds across process
    // restarts and multiple workers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_records (
            fingerprint TEXT PRIMARY KEY,
            canonical_item_id TEXT NOT NULL,
            perceptual_hash TEXT,
            first_seen_at TEXT NOT NULL,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            released_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            keywords TEXT NOT NULL,
            category_label TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!(
        "Database tables initialized (stored_records, duplicate_records, classification_rules)"
    );

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    chanvault_common::db::create_settings_table(&pool).await.unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
