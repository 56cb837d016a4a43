//! Bounded-backoff retry for transient failures
//!
//! Transient conditions (index unavailable, storage write contention)
//! are retried a fixed number of times with exponential backoff.
//! Non-transient errors return immediately.

use crate::error::{IngestError, IngestResult};
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry an operation up to `max_attempts` times while it fails with a
/// transient error.
///
/// **Backoff strategy:**
/// - Initial delay: 10ms
/// - Multiplier: 2.0 (exponential)
/// - Max delay: 1000ms
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> IngestResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = IngestResult<T>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempts = max_attempts,
                        error = %err,
                        "Retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, IngestError>(7)
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(IngestError::IndexUnavailable("locked".to_string()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_policy_errors() {
        let calls = AtomicU32::new(0);
        let result: IngestResult<()> = retry_with_backoff("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::PayloadTooLarge { size_bytes: 2, max_bytes: 1 })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: IngestResult<()> = retry_with_backoff("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::StorageWrite("disk full".to_string()))
        })
        .await;

        assert!(matches!(result, Err(IngestError::StorageWrite(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
