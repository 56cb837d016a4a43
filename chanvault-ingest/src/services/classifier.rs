//! Keyword classification engine
//!
//! Maps message metadata and associated text to zero-or-more category
//! labels. Rules are evaluated independently (not mutually exclusive):
//! an item may receive several labels, and no match yields an empty
//! result rather than an error. Reclassification re-runs classify over
//! stored metadata after a rule-set change, without re-fingerprinting.

use crate::db::rules::{self, ClassificationRule};
use crate::types::{CategoryScore, ClassificationResult};
use chanvault_common::Result;
use sqlx::SqlitePool;
use std::sync::RwLock;

/// Classification engine with an in-memory rule cache
pub struct ClassificationEngine {
    db: SqlitePool,
    rules: RwLock<Vec<ClassificationRule>>,
}

impl ClassificationEngine {
    /// Create an engine and load the active rule set
    pub async fn new(db: SqlitePool) -> Result<Self> {
        let engine = Self {
            db,
            rules: RwLock::new(Vec::new()),
        };
        engine.reload().await?;
        Ok(engine)
    }

    /// Reload rules from the database (hot rule-set update)
    pub async fn reload(&self) -> Result<usize> {
        let loaded = rules::load_active_rules(&self.db).await?;
        let count = loaded.len();
        *self.rules.write().expect("rules lock poisoned") = loaded;
        tracing::info!(rules = count, "Classification rules loaded");
        Ok(count)
    }

    /// Classify an item from its associated text and channel tags.
    ///
    /// A rule matches when any of its keywords is found (case-insensitive
    /// substring) in the text or tags. Confidence combines the fraction
    /// of matched keywords with the rule's priority, normalized to
    /// [0, 1]. Labels are ordered by descending confidence; ties keep
    /// rule declaration order (display ordering only, no label is
    /// dropped).
    pub fn classify(&self, associated_text: Option<&str>, channel_tags: &[String]) -> ClassificationResult {
        let rules = self.rules.read().expect("rules lock poisoned");
        classify_with_rules(&rules, associated_text, channel_tags)
    }
}

fn classify_with_rules(
    rules: &[ClassificationRule],
    associated_text: Option<&str>,
    channel_tags: &[String],
) -> ClassificationResult {
    let mut haystacks: Vec<String> = Vec::with_capacity(1 + channel_tags.len());
    if let Some(text) = associated_text {
        haystacks.push(text.to_lowercase());
    }
    haystacks.extend(channel_tags.iter().map(|t| t.to_lowercase()));

    if haystacks.is_empty() {
        return ClassificationResult::default();
    }

    let max_priority = rules.iter().map(|r| r.priority).max().unwrap_or(0).max(1);

    let mut labels: Vec<CategoryScore> = Vec::new();
    for rule in rules {
        if rule.keywords.is_empty() {
            continue;
        }

        let matched = rule
            .keywords
            .iter()
            .filter(|kw| {
                let kw = kw.to_lowercase();
                !kw.is_empty() && haystacks.iter().any(|h| h.contains(&kw))
            })
            .count();

        if matched == 0 {
            continue;
        }

        let keyword_ratio = matched as f64 / rule.keywords.len() as f64;
        let priority_weight = rule.priority.max(0) as f64 / max_priority as f64;
        // Any match scores at least half of the rule's priority weight;
        // more matched keywords push the score toward the full weight
        let confidence = (priority_weight * (0.5 + 0.5 * keyword_ratio)).clamp(0.0, 1.0);

        match labels.iter_mut().find(|l| l.label == rule.category_label) {
            Some(existing) => existing.confidence = existing.confidence.max(confidence),
            None => labels.push(CategoryScore {
                label: rule.category_label.clone(),
                confidence,
            }),
        }
    }

    // Stable sort keeps declaration order for equal confidences
    labels.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ClassificationResult { labels }
}
