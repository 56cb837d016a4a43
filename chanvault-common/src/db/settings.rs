//! Settings table access
//!
//! Key/value settings persisted in the database. Settings are the
//! authoritative source for tunables that must be hot-reloadable without
//! restarting in-flight processing (max blob size, duplicate similarity
//! threshold, retry policy).

use crate::Result;
use sqlx::SqlitePool;

/// Read a setting value, or None if unset
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

/// Write a setting value (insert or replace)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read an integer setting with a default
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Read a float setting with a default
pub async fn get_setting_f64(pool: &SqlitePool, key: &str, default: f64) -> Result<f64> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Read a boolean setting with a default ("true"/"1" are truthy)
pub async fn get_setting_bool(pool: &SqlitePool, key: &str, default: bool) -> Result<bool> {
    Ok(get_setting(pool, key)
        .await?
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_settings_table;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_settings_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn set_then_get() {
        let pool = setup().await;
        set_setting(&pool, "max_blob_size_bytes", "1048576").await.unwrap();

        let value = get_setting(&pool, "max_blob_size_bytes").await.unwrap();
        assert_eq!(value.as_deref(), Some("1048576"));

        let parsed = get_setting_i64(&pool, "max_blob_size_bytes", 0).await.unwrap();
        assert_eq!(parsed, 1_048_576);
    }

    #[tokio::test]
    async fn missing_key_returns_default() {
        let pool = setup().await;
        assert_eq!(get_setting_i64(&pool, "nope", 42).await.unwrap(), 42);
        assert!(!get_setting_bool(&pool, "nope", false).await.unwrap());
        assert_eq!(get_setting_f64(&pool, "nope", 0.95).await.unwrap(), 0.95);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let pool = setup().await;
        set_setting(&pool, "k", "a").await.unwrap();
        set_setting(&pool, "k", "b").await.unwrap();
        assert_eq!(get_setting(&pool, "k").await.unwrap().as_deref(), Some("b"));
    }
}
