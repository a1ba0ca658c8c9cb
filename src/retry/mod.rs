//! Retry with exponential backoff and jitter
//!
//! [`RetryCoordinator`] is the mechanical primitive: it re-invokes an operation
//! with growing delays. Whether an error is worth retrying is a caller policy,
//! expressed as the predicate passed to [`RetryCoordinator::retry_if`] and
//! usually built from [`classify`].

mod classify;

pub use classify::{classify, is_permanent, recovery_hint, ErrorClass};

use crate::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (0-based),
    /// without jitter: `min(max_delay, initial_delay * multiplier^attempt)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Base delay scaled by a random factor in `[1 - jitter, 1 + jitter]`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Number of times the operation was invoked
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries `operation` on every error, up to `max_retries` times
    ///
    /// The operation receives the 0-based attempt index, which callers use to
    /// pick the next fallback (for example a different wait strategy).
    pub async fn retry<T, E, F, Fut>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_if(operation, |_| true).await
    }

    /// Retries `operation` while `should_retry` accepts the error
    ///
    /// An error rejected by `should_retry` is returned immediately without
    /// sleeping or consuming further attempts.
    pub async fn retry_if<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(error) => {
                    if attempt >= self.policy.max_retries || !should_retry(&error) {
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt + 1,
                        };
                    }

                    let delay = self.policy.jittered_delay(attempt);
                    tracing::debug!(attempt = attempt + 1, ?delay, "Retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            jitter: 0.1,
        };
        for _ in 0..100 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1_100));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let coordinator = RetryCoordinator::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let outcome = coordinator
            .retry(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok(2));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let coordinator = RetryCoordinator::new(fast_policy(2));

        let outcome: RetryOutcome<(), &str> = coordinator.retry(|_| async { Err("down") }).await;

        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_rejected_error_short_circuits() {
        let coordinator = RetryCoordinator::new(fast_policy(5));

        let outcome: RetryOutcome<(), u16> = coordinator
            .retry_if(|_| async { Err(404) }, |status| *status >= 500)
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result, Err(404));
    }

    #[tokio::test]
    async fn test_attempt_index_is_passed() {
        let coordinator = RetryCoordinator::new(fast_policy(3));
        let seen = std::sync::Mutex::new(Vec::new());

        let _: RetryOutcome<(), ()> = coordinator
            .retry(|attempt| {
                seen.lock().unwrap().push(attempt);
                async { Err(()) }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
