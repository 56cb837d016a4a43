//! Classification rule persistence
//!
//! Rules are ordered by declaration (rowid): declaration order breaks
//! confidence ties during classification.

use chanvault_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// One keyword-matching rule: any keyword hit contributes the label
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    pub id: i64,
    pub keywords: Vec<String>,
    pub category_label: String,
    pub priority: i64,
    pub active: bool,
}

/// Load active rules in declaration order
pub async fn load_active_rules(pool: &SqlitePool) -> Result<Vec<ClassificationRule>> {
    let rows = sqlx::query(
        "SELECT id, keywords, category_label, priority, active FROM classification_rules WHERE active = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let keywords_json: String = row.get("keywords");
            let keywords: Vec<String> = serde_json::from_str(&keywords_json)
                .map_err(|e| Error::Internal(format!("Invalid keywords JSON: {}", e)))?;
            let active: i64 = row.get("active");
            Ok(ClassificationRule {
                id: row.get("id"),
                keywords,
                category_label: row.get("category_label"),
                priority: row.get("priority"),
                active: active != 0,
            })
        })
        .collect()
}

/// Insert a rule; returns its id
pub async fn insert_rule(
    pool: &SqlitePool,
    keywords: &[String],
    category_label: &str,
    priority: i64,
) -> Result<i64> {
    let keywords_json = serde_json::to_string(keywords)
        .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;

    let result = sqlx::query(
        "INSERT INTO classification_rules (keywords, category_label, priority, active) VALUES (?, ?, ?, 1)",
    )
    .bind(keywords_json)
    .bind(category_label)
    .bind(priority)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Deactivate a rule without losing it
pub async fn deactivate_rule(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE classification_rules SET active = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Seed default rules on first run (no-op when any rule exists)
pub async fn seed_default_rules(pool: &SqlitePool) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classification_rules")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let defaults: &[(&[&str], &str, i64)] = &[
        (&["movie", "film", "trailer", "series"], "entertainment", 7),
        (&["song", "music", "concert", "album"], "music", 7),
        (&["news", "breaking", "report"], "news", 6),
        (&["match", "goal", "tournament", "league"], "sports", 6),
        (&["cat", "dog", "pet", "animal"], "animals", 5),
        (&["meme", "funny", "lol"], "memes", 4),
    ];

    for (keywords, label, priority) in defaults {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        insert_rule(pool, &keywords, label, *priority).await?;
    }

    tracing::info!(rules = defaults.len(), "Seeded default classification rules");
    Ok(())
}
