//! Bounded exponential backoff.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time budget for sleeping between attempts.
    pub max_total_wait: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_total_wait: Duration::from_millis(config.max_total_wait_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            max_total_wait: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or the wait budget would be exceeded.
    ///
    /// The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut waited = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                tracing::debug!(operation = operation_name, attempt, error = %err, "Not retryable");
                return Err(err);
            }
            if attempt >= self.max_attempts {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Giving up: attempts exhausted"
                );
                return Err(err);
            }

            let delay = self.backoff(attempt);
            if waited + delay > self.max_total_wait && !delay.is_zero() {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    waited_ms = waited.as_millis() as u64,
                    error = %err,
                    "Giving up: retry wait budget exhausted"
                );
                return Err(err);
            }

            tracing::warn!(
                operation = operation_name,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, will retry after backoff"
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            max_total_wait: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = RetryPolicy::immediate(3)
            .run("test", |_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("busy".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::immediate(2)
            .run("test", |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("busy".to_string()) }
            })
            .await;
        assert_eq!(result, Err("busy".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::immediate(5)
            .run("test", |e: &String| e != "fatal", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_budget_bounds_retries() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            max_total_wait: Duration::from_millis(250),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy
            .run("test", |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("busy".to_string()) }
            })
            .await;
        assert!(result.is_err());
        // 100ms + 100ms fit the budget, a third sleep would not
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
