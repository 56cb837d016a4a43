//! Pipeline tunables resolved from the settings table
//!
//! Settings are re-read per message so changes take effect without
//! restarting in-flight processing.

use chanvault_common::db::{get_setting_bool, get_setting_f64, get_setting_i64, set_setting};
use chanvault_common::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Default maximum blob size: 100 MB
pub const DEFAULT_MAX_BLOB_SIZE_BYTES: i64 = 100 * 1024 * 1024;
/// Default perceptual similarity threshold (fraction of matching bits)
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;
/// Default commit retry attempts for transient storage failures
pub const DEFAULT_COMMIT_RETRY_ATTEMPTS: i64 = 3;
/// Default reserve retry attempts while the index is unavailable
pub const DEFAULT_RESERVE_RETRY_ATTEMPTS: i64 = 3;
/// Default cooldown before a released fingerprint may be re-ingested
pub const DEFAULT_RELEASE_COOLDOWN_SECONDS: i64 = 0;

/// Tunables governing one message's trip through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_blob_size_bytes: u64,
    /// When enabled, image duplicates are detected by perceptual-hash
    /// similarity instead of exact digest equality
    pub perceptual_enabled: bool,
    pub similarity_threshold: f64,
    pub commit_retry_attempts: u32,
    pub reserve_retry_attempts: u32,
    pub release_cooldown_seconds: i64,
}

impl PipelineSettings {
    /// Load current settings, falling back to compiled defaults
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            max_blob_size_bytes: get_setting_i64(
                pool,
                "max_blob_size_bytes",
                DEFAULT_MAX_BLOB_SIZE_BYTES,
            )
            .await?
            .max(0) as u64,
            perceptual_enabled: get_setting_bool(pool, "perceptual_enabled", false).await?,
            similarity_threshold: get_setting_f64(
                pool,
                "perceptual_similarity_threshold",
                DEFAULT_SIMILARITY_THRESHOLD,
            )
            .await?,
            commit_retry_attempts: get_setting_i64(
                pool,
                "commit_retry_attempts",
                DEFAULT_COMMIT_RETRY_ATTEMPTS,
            )
            .await?
            .clamp(1, 10) as u32,
            reserve_retry_attempts: get_setting_i64(
                pool,
                "reserve_retry_attempts",
                DEFAULT_RESERVE_RETRY_ATTEMPTS,
            )
            .await?
            .clamp(1, 10) as u32,
            release_cooldown_seconds: get_setting_i64(
                pool,
                "release_cooldown_seconds",
                DEFAULT_RELEASE_COOLDOWN_SECONDS,
            )
            .await?
            .max(0),
        })
    }
}

/// Write default settings for keys that are not yet present, and log the
/// active duplicate-detection mode (it changes duplicate semantics)
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let defaults: &[(&str, String)] = &[
        ("max_blob_size_bytes", DEFAULT_MAX_BLOB_SIZE_BYTES.to_string()),
        ("perceptual_enabled", "false".to_string()),
        (
            "perceptual_similarity_threshold",
            DEFAULT_SIMILARITY_THRESHOLD.to_string(),
        ),
        ("commit_retry_attempts", DEFAULT_COMMIT_RETRY_ATTEMPTS.to_string()),
        ("reserve_retry_attempts", DEFAULT_RESERVE_RETRY_ATTEMPTS.to_string()),
        (
            "release_cooldown_seconds",
            DEFAULT_RELEASE_COOLDOWN_SECONDS.to_string(),
        ),
    ];

    for (key, default) in defaults {
        if chanvault_common::db::get_setting(pool, key).await?.is_none() {
            set_setting(pool, key, default).await?;
        }
    }

    let settings = PipelineSettings::load(pool).await?;
    if settings.perceptual_enabled {
        info!(
            threshold = settings.similarity_threshold,
            "Duplicate detection mode: perceptual similarity"
        );
    } else {
        info!("Duplicate detection mode: exact fingerprint equality");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanvault_common::db::create_settings_table;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_settings_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn defaults_when_unset() {
        let pool = setup().await;
        let settings = PipelineSettings::load(&pool).await.unwrap();
        assert_eq!(settings.max_blob_size_bytes, 100 * 1024 * 1024);
        assert!(!settings.perceptual_enabled);
        assert_eq!(settings.commit_retry_attempts, 3);
        assert_eq!(settings.release_cooldown_seconds, 0);
    }

    #[tokio::test]
    async fn init_seeds_missing_keys_only() {
        let pool = setup().await;
        set_setting(&pool, "max_blob_size_bytes", "1024").await.unwrap();

        init_default_settings(&pool).await.unwrap();

        let settings = PipelineSettings::load(&pool).await.unwrap();
        // Preexisting value untouched, others seeded
        assert_eq!(settings.max_blob_size_bytes, 1024);
        assert!(!settings.perceptual_enabled);
    }

    #[tokio::test]
    async fn settings_are_hot_reloadable() {
        let pool = setup().await;
        init_default_settings(&pool).await.unwrap();

        set_setting(&pool, "perceptual_enabled", "true").await.unwrap();
        set_setting(&pool, "perceptual_similarity_threshold", "0.9").await.unwrap();

        let settings = PipelineSettings::load(&pool).await.unwrap();
        assert!(settings.perceptual_enabled);
        assert_eq!(settings.similarity_threshold, 0.9);
    }
}
