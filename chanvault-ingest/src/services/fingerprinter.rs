//! Content fingerprinting
//!
//! Computes the SHA-256 digest that serves as the dedup key, and
//! optionally a perceptual digest for near-duplicate tolerance on
//! images (re-encoded or re-compressed copies). Deterministic, no side
//! effects.

use crate::error::{IngestError, IngestResult};
use crate::types::{Fingerprint, MediaItem, MediaKind};
use chanvault_common::Error;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Media fingerprinter
pub struct Fingerprinter {
    /// When set, image items also get a perceptual digest
    perceptual_enabled: bool,
}

impl Fingerprinter {
    pub fn new(perceptual_enabled: bool) -> Self {
        Self { perceptual_enabled }
    }

    /// Compute the fingerprint for a media item.
    ///
    /// Hashing is CPU work, so it runs on a blocking thread. Fails with
    /// `UnreadableContent` when the payload carries no bytes.
    pub async fn fingerprint(&self, item: &MediaItem) -> IngestResult<Fingerprint> {
        if item.bytes.is_empty() {
            return Err(IngestError::UnreadableContent("empty payload".to_string()));
        }

        let bytes = Arc::clone(&item.bytes);
        let want_perceptual = self.perceptual_enabled && item.media_kind == MediaKind::Image;

        let fingerprint = tokio::task::spawn_blocking(move || {
            let content = content_digest(&bytes);
            let perceptual = if want_perceptual {
                perceptual_digest(&bytes)
            } else {
                None
            };
            Fingerprint { content, perceptual }
        })
        .await
        .map_err(|e| {
            IngestError::Common(Error::Internal(format!("Fingerprint task failed: {}", e)))
        })?;

        tracing::debug!(
            item_id = %item.item_id,
            fingerprint = %fingerprint.content,
            perceptual = fingerprint.perceptual.is_some(),
            "Computed fingerprint"
        );

        Ok(fingerprint)
    }
}

/// SHA-256 hex digest over the payload bytes, fed in 1MB chunks
fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(1024 * 1024) {
        hasher.update(chunk);
    }
    format!("{:x}", hasher.finalize())
}

/// Perceptual digest for an image payload.
/// Uses the DoubleGradient algorithm (256-bit hash). Returns None when
/// the bytes do not decode as an image; the content digest still covers
/// exact duplicates in that case.
fn perceptual_digest(bytes: &[u8]) -> Option<String> {
    let img = match img_hash::image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::debug!(error = %e, "Image decode failed, skipping perceptual digest");
            return None;
        }
    };

    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();

    Some(hasher.hash_image(&img).to_base64())
}

/// Similarity of two perceptual digests as the fraction of matching bits
/// (1.0 = identical). None when either digest fails to parse.
pub fn perceptual_similarity(hash_a: &str, hash_b: &str) -> Option<f64> {
    let a = img_hash::ImageHash::<Vec<u8>>::from_base64(hash_a).ok()?;
    let b = img_hash::ImageHash::<Vec<u8>>::from_base64(hash_b).ok()?;

    let distance = a.dist(&b);
    let max_bits = (a.as_bytes().len() * 8).max(1) as f64;
    Some(1.0 - (distance as f64 / max_bits))
}
