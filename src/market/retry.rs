//! Retry policy for gateway calls
//!
//! A policy bundles the attempt bound, the backoff function and the predicate
//! deciding which errors are worth another attempt.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::GatewayError;

pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
pub type RetryPredicate = Arc<dyn Fn(&GatewayError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffFn,
    retryable: RetryPredicate,
    honor_retry_after: bool,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("first_backoff", &(self.backoff)(1))
            .field("honor_retry_after", &self.honor_retry_after)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffFn, retryable: RetryPredicate) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable,
            honor_retry_after: true,
        }
    }

    /// Retry only rate-limit responses, waiting `attempt × step`
    pub fn linear_rate_limit(max_attempts: u32, step: Duration) -> Self {
        Self::new(
            max_attempts,
            Arc::new(move |attempt| step * attempt),
            Arc::new(GatewayError::is_rate_limited),
        )
    }

    /// Retry rate limits, timeouts and 5xx, waiting `attempt × step`
    pub fn linear_transient(max_attempts: u32, step: Duration) -> Self {
        Self::new(
            max_attempts,
            Arc::new(move |attempt| step * attempt),
            Arc::new(GatewayError::is_transient),
        )
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self::new(1, Arc::new(|_| Duration::ZERO), Arc::new(|_| false))
    }

    /// Retries transient failures without ever sleeping. Meant for tests.
    pub fn zero_latency(max_attempts: u32) -> Self {
        Self {
            honor_retry_after: false,
            ..Self::new(
                max_attempts,
                Arc::new(|_| Duration::ZERO),
                Arc::new(GatewayError::is_transient),
            )
        }
    }

    pub fn with_retryable(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn should_retry(&self, attempt: u32, error: &GatewayError) -> bool {
        attempt < self.max_attempts && (self.retryable)(error)
    }

    /// Wait before attempt `attempt + 1`. A server `Retry-After` is a lower bound.
    pub fn backoff_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        let base = (self.backoff)(attempt);
        match error.retry_after() {
            Some(server) if self.honor_retry_after => base.max(server),
            _ => base,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt bound is reached
    pub async fn run<T, F, Fut>(&self, call: &str, target: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let wait = self.backoff_for(attempt, &e);
                    warn!(
                        call = call,
                        target = target,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        error = %e,
                        "Retrying gateway call"
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limited() -> GatewayError {
        GatewayError::RateLimited { retry_after: None }
    }

    #[test]
    fn linear_backoff_grows_with_attempts() {
        let policy = RetryPolicy::linear_rate_limit(3, Duration::from_secs(5));
        assert_eq!(policy.backoff_for(1, &limited()), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(2, &limited()), Duration::from_secs(10));
    }

    #[test]
    fn retry_after_is_a_lower_bound() {
        let policy = RetryPolicy::linear_rate_limit(3, Duration::from_secs(5));
        let err = GatewayError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(policy.backoff_for(1, &err), Duration::from_secs(30));
        assert_eq!(
            RetryPolicy::zero_latency(3).backoff_for(1, &err),
            Duration::ZERO
        );
    }

    #[test]
    fn rate_limit_policy_fails_fast_on_other_errors() {
        let policy = RetryPolicy::linear_rate_limit(3, Duration::from_secs(5));
        assert!(policy.should_retry(1, &limited()));
        assert!(!policy.should_retry(3, &limited()));
        assert!(!policy.should_retry(1, &GatewayError::Timeout));
        assert!(!policy.should_retry(
            1,
            &GatewayError::Http {
                status: 500,
                body: String::new()
            }
        ));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::zero_latency(3);

        let result = policy
            .run("ath", "bitcoin", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(limited())
                    } else {
                        Ok(69000.0)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(69000.0));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::zero_latency(3);

        let result: Result<f64, _> = policy
            .run("ath", "bitcoin", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(limited()) }
            })
            .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::zero_latency(5);

        let result: Result<f64, _> = policy
            .run("ath", "bitcoin", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::Decode("missing ath".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
