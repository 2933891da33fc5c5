//! Retry with exponential backoff for remote transfers.
//!
//! Only transient failures (throttled, network) are retried. Everything
//! else returns after the first attempt.

use std::future::Future;
use std::time::Duration;

use tiercache_core::CacheConfig;
use tiercache_store::TransferError;

/// Total attempts, first try included.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles for each one after.
const DEFAULT_BASE_DELAY_MS: u64 = 200;

/// Backoff policy for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after `attempts` failed attempts (1-indexed): base, 2×base, 4×base, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the attempt
    /// budget, or `keep_going` turns false between attempts.
    ///
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, F, Fut, K>(
        &self,
        key: &str,
        keep_going: K,
        mut op: F,
    ) -> (Result<T, TransferError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
        K: Fn() -> bool,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempts),
                Err(e) if e.is_retryable() && attempts < self.max_attempts && keep_going() => {
                    let delay = self.next_delay(attempts);
                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        key,
                        "transfer failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tiercache_store::TransferClass;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn delays_double() {
        let p = RetryPolicy::default();
        assert_eq!(p.next_delay(1), Duration::from_millis(200));
        assert_eq!(p.next_delay(2), Duration::from_millis(400));
        assert_eq!(p.next_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn zero_attempts_config_still_tries_once() {
        let config = CacheConfig {
            retry_attempts: 0,
            ..CacheConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_until_exhausted() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast()
            .run("k", || true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransferError::network("reset")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let (result, attempts) = fast()
            .run("k", || true, || async {
                Err::<(), _>(TransferError::new(TransferClass::Auth, "denied"))
            })
            .await;
        assert_eq!(result.unwrap_err().class, TransferClass::Auth);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast()
            .run("k", || true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TransferError::new(TransferClass::Throttled, "slow down"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn stops_when_told_to() {
        let (result, attempts) = fast()
            .run("k", || false, || async {
                Err::<(), _>(TransferError::network("reset"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
