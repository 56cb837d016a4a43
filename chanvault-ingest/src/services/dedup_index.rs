//! Duplicate index
//!
//! The authoritative index of known fingerprints. `reserve` is the sole
//! synchronization point for concurrent arrivals of identical content:
//! the unique-key insert on the fingerprint column grants `Accepted` to
//! exactly one caller, and the guarantee holds across process restarts
//! and multiple workers because the index lives in the database, not in
//! a process-local lock map.

use crate::error::{IngestError, IngestResult};
use crate::services::fingerprinter::perceptual_similarity;
use crate::types::{DuplicateRecord, Fingerprint};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Result of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Caller holds the fingerprint; its item becomes canonical
    Accepted,
    /// Content already known; duplicate_count was incremented
    Duplicate { canonical_item_id: Uuid },
    /// The fingerprint was released after a failed commit and its
    /// configured cooldown has not passed yet (transient)
    CoolingDown,
}

/// Duplicate index over the duplicate_records table
#[derive(Clone)]
pub struct DuplicateIndex {
    db: SqlitePool,
}

impl DuplicateIndex {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Atomically claim a fingerprint for `item_id`.
    ///
    /// Exactly one concurrent caller is granted `Accepted` per
    /// fingerprint; every other caller observes `Duplicate` with the
    /// canonical item id and an incremented duplicate_count. With
    /// perceptual matching enabled, a near-match within the similarity
    /// threshold counts as a duplicate of the matched canonical item.
    ///
    /// Backing-store failures surface as `IndexUnavailable`; callers
    /// must treat that as transient, not as "not a duplicate".
    pub async fn reserve(
        &self,
        fingerprint: &Fingerprint,
        item_id: Uuid,
        perceptual_threshold: Option<f64>,
        release_cooldown_seconds: i64,
    ) -> IngestResult<ReserveOutcome> {
        if let (Some(threshold), Some(perceptual)) =
            (perceptual_threshold, fingerprint.perceptual.as_deref())
        {
            if let Some(outcome) = self
                .try_perceptual_match(&fingerprint.content, perceptual, threshold)
                .await?
            {
                return Ok(outcome);
            }
        }

        // Insert-if-absent first, then the duplicate increment path. The
        // short loop covers the window where another caller deletes a
        // released row between our insert and update.
        for _ in 0..2 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO duplicate_records
                    (fingerprint, canonical_item_id, perceptual_hash, first_seen_at, duplicate_count, released_at)
                VALUES (?, ?, ?, ?, 0, NULL)
                ON CONFLICT(fingerprint) DO NOTHING
                "#,
            )
            .bind(&fingerprint.content)
            .bind(item_id.to_string())
            .bind(&fingerprint.perceptual)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await
            .map_err(index_unavailable)?;

            if inserted.rows_affected() == 1 {
                tracing::debug!(fingerprint = %fingerprint.content, item_id = %item_id, "Reservation accepted");
                return Ok(ReserveOutcome::Accepted);
            }

            let row = sqlx::query(
                "SELECT canonical_item_id, released_at FROM duplicate_records WHERE fingerprint = ?",
            )
            .bind(&fingerprint.content)
            .fetch_optional(&self.db)
            .await
            .map_err(index_unavailable)?;

            let Some(row) = row else {
                // Row vanished (released with zero cooldown); retry insert
                continue;
            };

            let released_at: Option<String> = row.get("released_at");
            if let Some(released_at) = released_at {
                let released_at = parse_timestamp(&released_at)?;
                if Utc::now() - released_at < Duration::seconds(release_cooldown_seconds) {
                    return Ok(ReserveOutcome::CoolingDown);
                }

                // Cooldown passed: take the fingerprint over. The
                // released_at guard lets exactly one caller win.
                let taken = sqlx::query(
                    "UPDATE duplicate_records SET canonical_item_id = ?, released_at = NULL WHERE fingerprint = ? AND released_at IS NOT NULL",
                )
                .bind(item_id.to_string())
                .bind(&fingerprint.content)
                .execute(&self.db)
                .await
                .map_err(index_unavailable)?;

                if taken.rows_affected() == 1 {
                    tracing::debug!(fingerprint = %fingerprint.content, item_id = %item_id, "Released reservation taken over");
                    return Ok(ReserveOutcome::Accepted);
                }
                // Lost the takeover race; the winner is canonical now
            }

            if let Some(outcome) = self.increment_duplicate(&fingerprint.content).await? {
                return Ok(outcome);
            }
        }

        Err(IngestError::IndexUnavailable(
            "reservation contention not resolved".to_string(),
        ))
    }

    /// Read-only duplicate query
    pub async fn lookup(&self, fingerprint: &str) -> IngestResult<Option<DuplicateRecord>> {
        let row = sqlx::query("SELECT * FROM duplicate_records WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.db)
            .await
            .map_err(index_unavailable)?;

        row.map(|row| {
            let canonical_str: String = row.get("canonical_item_id");
            let canonical_item_id = Uuid::parse_str(&canonical_str).map_err(|e| {
                IngestError::Common(chanvault_common::Error::Internal(format!(
                    "Invalid UUID in database: {}",
                    e
                )))
            })?;
            let released_at: Option<String> = row.get("released_at");
            Ok(DuplicateRecord {
                fingerprint: row.get("fingerprint"),
                canonical_item_id,
                perceptual_hash: row.get("perceptual_hash"),
                first_seen_at: parse_timestamp(&row.get::<String, _>("first_seen_at"))?,
                duplicate_count: row.get("duplicate_count"),
                released_at: released_at.as_deref().map(parse_timestamp).transpose()?,
            })
        })
        .transpose()
    }

    /// Release a reservation after a failed commit.
    ///
    /// Only the canonical holder may release, and never once a stored
    /// record exists for the fingerprint: releasing then would allow a
    /// second canonical item. With a cooldown configured the row is
    /// marked released instead of deleted, so re-ingestion waits out the
    /// cooldown.
    pub async fn release(
        &self,
        fingerprint: &str,
        item_id: Uuid,
        release_cooldown_seconds: i64,
    ) -> IngestResult<()> {
        if crate::db::records::record_exists_for_fingerprint(&self.db, fingerprint)
            .await
            .map_err(IngestError::Common)?
        {
            tracing::warn!(
                fingerprint = %fingerprint,
                item_id = %item_id,
                "Refusing to release reservation: stored record exists"
            );
            return Ok(());
        }

        let result = if release_cooldown_seconds > 0 {
            sqlx::query(
                "UPDATE duplicate_records SET released_at = ? WHERE fingerprint = ? AND canonical_item_id = ? AND released_at IS NULL",
            )
            .bind(Utc::now().to_rfc3339())
            .bind(fingerprint)
            .bind(item_id.to_string())
            .execute(&self.db)
            .await
        } else {
            sqlx::query(
                "DELETE FROM duplicate_records WHERE fingerprint = ? AND canonical_item_id = ?",
            )
            .bind(fingerprint)
            .bind(item_id.to_string())
            .execute(&self.db)
            .await
        }
        .map_err(index_unavailable)?;

        if result.rows_affected() == 1 {
            tracing::info!(fingerprint = %fingerprint, item_id = %item_id, "Reservation released");
        }
        Ok(())
    }

    /// Increment duplicate_count for an active row; returns the outcome
    /// or None when no active row exists
    async fn increment_duplicate(&self, fingerprint: &str) -> IngestResult<Option<ReserveOutcome>> {
        let canonical: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE duplicate_records
            SET duplicate_count = duplicate_count + 1
            WHERE fingerprint = ? AND released_at IS NULL
            RETURNING canonical_item_id
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.db)
        .await
        .map_err(index_unavailable)?;

        canonical
            .map(|canonical| {
                let canonical_item_id = Uuid::parse_str(&canonical).map_err(|e| {
                    IngestError::Common(chanvault_common::Error::Internal(format!(
                        "Invalid UUID in database: {}",
                        e
                    )))
                })?;
                tracing::debug!(fingerprint = %fingerprint, canonical = %canonical_item_id, "Duplicate detected");
                Ok(ReserveOutcome::Duplicate { canonical_item_id })
            })
            .transpose()
    }

    /// Near-duplicate scan over stored perceptual hashes. Candidate
    /// comparison happens in-process; an exact-fingerprint row for the
    /// same content is handled by the exact path instead.
    async fn try_perceptual_match(
        &self,
        content_fingerprint: &str,
        perceptual: &str,
        threshold: f64,
    ) -> IngestResult<Option<ReserveOutcome>> {
        let rows = sqlx::query(
            "SELECT fingerprint, perceptual_hash FROM duplicate_records WHERE perceptual_hash IS NOT NULL AND released_at IS NULL",
        )
        .fetch_all(&self.db)
        .await
        .map_err(index_unavailable)?;

        let mut best: Option<(String, f64)> = None;
        for row in rows {
            let candidate_fp: String = row.get("fingerprint");
            if candidate_fp == content_fingerprint {
                continue;
            }
            let candidate_hash: String = row.get("perceptual_hash");
            if let Some(similarity) = perceptual_similarity(perceptual, &candidate_hash) {
                if similarity >= threshold
                    && best.as_ref().map(|(_, s)| similarity > *s).unwrap_or(true)
                {
                    best = Some((candidate_fp, similarity));
                }
            }
        }

        let Some((matched_fp, similarity)) = best else {
            return Ok(None);
        };

        tracing::info!(
            fingerprint = %content_fingerprint,
            matched = %matched_fp,
            similarity,
            "Perceptual near-duplicate detected"
        );
        self.increment_duplicate(&matched_fp).await
    }
}

fn index_unavailable(err: sqlx::Error) -> IngestError {
    IngestError::IndexUnavailable(err.to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, IngestError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            IngestError::Common(chanvault_common::Error::Internal(format!(
                "Invalid timestamp in database: {}",
                e
            )))
        })
}
