//! Request pacing: jittered delays and exponential backoff
//!
//! The jittered delay is always awaited before a concurrency permit is
//! acquired, so a sleeping worker never occupies a slot. Backoff between
//! retries likewise happens with no permit held.

use crate::config::RetryConfig;
use crate::fetch::FetchOutcome;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Inclusive range for the randomized pre-request delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    /// No delay at all (tests, local mirrors)
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Draws one delay from the range
    pub fn sample(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::rng().random_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }

    pub async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Backoff after the given failed attempt (1-based): base, 2*base, 4*base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Runs `attempt` until it yields a non-transient outcome or attempts run out
    ///
    /// Not-found, rejected and blocked outcomes return immediately; only
    /// [`FailureKind::Transient`](crate::fetch::FailureKind::Transient)
    /// failures are retried.
    pub async fn run<F, Fut>(&self, url: &str, mut attempt: F) -> FetchOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        let mut attempt_no = 1;
        loop {
            let mut outcome = attempt().await;
            outcome.attempts = attempt_no;

            if !outcome.is_transient() || attempt_no >= self.max_attempts {
                if outcome.is_transient() {
                    tracing::warn!(
                        "All {} attempts exhausted for {}: {}",
                        self.max_attempts,
                        url,
                        outcome.message.as_deref().unwrap_or("unknown error")
                    );
                }
                return outcome;
            }

            let backoff = self.backoff(attempt_no);
            tracing::debug!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt_no,
                self.max_attempts,
                url,
                outcome.message.as_deref().unwrap_or("unknown error"),
                backoff
            );
            tokio::time::sleep(backoff).await;
            attempt_no += 1;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FailureKind, FetchStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::new(5, 15);
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(15));
        }
        assert_eq!(DelayRange::none().sample(), Duration::ZERO);
    }

    #[test]
    fn test_delay_range_swapped_bounds() {
        let range = DelayRange::new(20, 10);
        assert_eq!(range.min_ms, 10);
        assert_eq!(range.max_ms, 20);
    }

    #[test]
    fn test_backoff_is_exponential() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let outcome = policy
            .run("https://x.test/", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                FetchOutcome::failed(FailureKind::Transient, Some(503), "HTTP 503")
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, FetchStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let outcome = policy
            .run("https://x.test/", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    FetchOutcome::failed(FailureKind::Transient, None, "timeout")
                } else {
                    FetchOutcome::success("<html>ok</html>".into(), 200)
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_not_found_and_blocked_never_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let makers: [fn() -> FetchOutcome; 2] = [
            || FetchOutcome::failed(FailureKind::NotFound, Some(404), "HTTP 404"),
            || FetchOutcome::blocked(None, Some(403)),
        ];

        for make in makers {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let outcome = policy
                .run("https://x.test/", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    make()
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(outcome.attempts, 1);
        }
    }
}
