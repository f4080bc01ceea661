//! Retry policy for v2 span consumers.
//!
//! The collector never retries a failed batch itself; storage that wants
//! retries wraps its consumer in [`RetryingSpanConsumer`].

use crate::storage::{SpanConsumer, StorageError};
use crate::v2;
use std::iter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// How often and how patiently a batch is resent.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Sends after the first one; zero stores each batch once.
    pub retries: u32,
    pub first_backoff: Duration,
    pub max_backoff: Duration,
    /// Growth of the backoff from one retry to the next.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            first_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// The wait before each retry, in order. Never longer than `max_backoff`,
    /// even for a multiplier that overflows or is not finite.
    fn backoffs(&self) -> impl Iterator<Item = Duration> + Send + '_ {
        let first = self.first_backoff.min(self.max_backoff);
        iter::successors(Some(first), move |previous| {
            let next = Duration::try_from_secs_f64(previous.as_secs_f64() * self.multiplier)
                .unwrap_or(self.max_backoff);
            Some(next.min(self.max_backoff))
        })
        .take(self.retries as usize)
    }
}

/// Resends batches whose storage failed, waiting longer after each failure.
///
/// [`StorageError::Rejected`] is final and returned without retrying. Once
/// every retry failed the batch fails with
/// [`StorageError::RetriesExhausted`].
///
/// # Example
///
/// ```ignore
/// let consumer = RetryingSpanConsumer::new(InMemoryStorage::new(), RetryConfig::default());
/// consumer.accept(spans).await?;
/// ```
pub struct RetryingSpanConsumer<C: SpanConsumer> {
    inner: C,
    config: RetryConfig,
    retries: AtomicU64,
    recovered: AtomicU64,
}

impl<C: SpanConsumer> RetryingSpanConsumer<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            retries: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Batches resent so far, counting every resend.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Batches that were stored only after a retry.
    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }
}

impl<C: SpanConsumer> SpanConsumer for RetryingSpanConsumer<C> {
    async fn accept(&self, spans: Vec<v2::Span>) -> Result<(), StorageError> {
        let mut backoffs = self.config.backoffs();
        let mut attempts = 1;
        loop {
            let error = match self.inner.accept(spans.clone()).await {
                Ok(()) => {
                    if attempts > 1 {
                        self.recovered.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(error @ StorageError::Rejected(_)) => return Err(error),
                Err(error) => error,
            };
            let Some(backoff) = backoffs.next() else {
                return Err(StorageError::RetriesExhausted { attempts });
            };
            debug!(attempts, %error, ?backoff, spans = spans.len(), "storing spans failed, retrying");
            self.retries.fetch_add(1, Ordering::Relaxed);
            sleep(backoff).await;
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TraceId;
    use std::sync::atomic::AtomicU32;

    /// Storage that fails its first `failures` batches.
    struct FlakyStorage {
        failures: AtomicU32,
        calls: AtomicU32,
        error: StorageError,
    }

    impl FlakyStorage {
        fn new(failures: u32) -> Self {
            Self::failing_with(failures, StorageError::Unavailable("connection reset".into()))
        }

        fn failing_with(failures: u32, error: StorageError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    impl SpanConsumer for FlakyStorage {
        async fn accept(&self, _spans: Vec<v2::Span>) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let failed = self
                .failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn quick(retries: u32) -> RetryConfig {
        RetryConfig {
            retries,
            first_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    fn spans() -> Vec<v2::Span> {
        vec![v2::Span::builder(TraceId::from_low(1), 1).name("get").build()]
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let retrying = RetryingSpanConsumer::new(FlakyStorage::new(2), quick(3));

        assert!(retrying.accept(spans()).await.is_ok());
        assert_eq!(retrying.retries(), 2);
        assert_eq!(retrying.recovered(), 1);
        assert_eq!(retrying.inner.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let retrying = RetryingSpanConsumer::new(FlakyStorage::new(10), quick(2));

        let result = retrying.accept(spans()).await;
        assert_eq!(result, Err(StorageError::RetriesExhausted { attempts: 3 }));
        assert_eq!(retrying.inner.calls.load(Ordering::Relaxed), 3);
        assert_eq!(retrying.recovered(), 0);
    }

    #[tokio::test]
    async fn test_no_retries_stores_once() {
        let retrying = RetryingSpanConsumer::new(FlakyStorage::new(1), quick(0));

        let result = retrying.accept(spans()).await;
        assert_eq!(result, Err(StorageError::RetriesExhausted { attempts: 1 }));
        assert_eq!(retrying.retries(), 0);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let rejected = StorageError::Rejected("span too large".into());
        let retrying = RetryingSpanConsumer::new(
            FlakyStorage::failing_with(5, rejected.clone()),
            quick(3),
        );

        assert_eq!(retrying.accept(spans()).await, Err(rejected));
        assert_eq!(retrying.retries(), 0);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let backoffs: Vec<_> = RetryConfig::default().backoffs().collect();
        assert_eq!(
            backoffs,
            [100, 200, 400].map(Duration::from_millis)
        );

        let long = RetryConfig {
            retries: 20,
            ..RetryConfig::default()
        };
        assert_eq!(long.backoffs().last(), Some(Duration::from_secs(10)));

        let wild = RetryConfig {
            multiplier: f64::INFINITY,
            ..RetryConfig::default()
        };
        assert!(wild.backoffs().all(|backoff| backoff <= wild.max_backoff));
    }
}
