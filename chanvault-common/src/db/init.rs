//! Database initialization
//!
//! Opens (or creates) the SQLite database beneath the storage root and
//! applies the pragmas the ingest workload needs: WAL for concurrent
//! readers during ingestion, busy timeout for writer contention.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create shared tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer, which matters when
    // multiple channels deliver messages in parallel
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_settings_table(&pool).await?;

    Ok(pool)
}

/// Create the settings table (idempotent)
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("test.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        // settings table exists
        sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&pool)
            .await
            .unwrap();
    }
}
