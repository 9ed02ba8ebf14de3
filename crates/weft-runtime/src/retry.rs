use std::future::Future;

use weft_core::{RetryPolicy, StepError};

/// Result of a retried operation with the zero-based index of the attempt
/// that produced it.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StepError>,
    pub attempt: u32,
}

/// Applies a [`RetryPolicy`] around an operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryHandler;

impl RetryHandler {
    pub fn new() -> Self {
        Self
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the policy's attempts are used up.
    ///
    /// `operation` receives the attempt index. `on_retry` runs before every
    /// attempt after the first, with the error that triggered it.
    pub async fn execute<T, F, Fut, R>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
        mut on_retry: R,
    ) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
        R: FnMut(u32, &StepError),
    {
        let last_attempt = policy.last_attempt();
        let mut attempt = 0;

        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempt,
                    }
                }
                Err(e) => e,
            };

            if attempt >= last_attempt || !policy.is_retryable(&error) {
                return Attempted {
                    result: Err(error),
                    attempt,
                };
            }

            let delay = policy.calculate_delay(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            on_retry(attempt, &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    async fn run_always_failing(policy: &RetryPolicy, error: StepError) -> (Attempted<()>, u32, Vec<u32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut retries = Vec::new();
        let outcome = RetryHandler::new()
            .execute(
                policy,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let error = error.clone();
                    async move { Err::<(), _>(error) }
                },
                |attempt, _| retries.push(attempt),
            )
            .await;
        (outcome, calls.load(Ordering::SeqCst), retries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_max_attempts_plus_one() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let (outcome, calls, retries) =
            run_always_failing(&policy, StepError::transient("flaky")).await;

        assert_eq!(calls, 4);
        assert_eq!(outcome.attempt, 3);
        assert!(outcome.result.is_err());
        assert_eq!(retries, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_runs_once() {
        let (outcome, calls, retries) =
            run_always_failing(&RetryPolicy::none(), StepError::transient("flaky")).await;
        assert_eq!(calls, 1);
        assert_eq!(outcome.attempt, 0);
        assert!(retries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(10));
        let (outcome, calls, _) = run_always_failing(&policy, StepError::fatal("bad input")).await;
        assert_eq!(calls, 1);
        assert_eq!(outcome.attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let outcome = RetryHandler::new()
            .execute(
                &policy,
                |attempt| async move {
                    if attempt < 2 {
                        Err(StepError::transient("not yet"))
                    } else {
                        Ok(attempt * 10)
                    }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(outcome.result.unwrap(), 20);
        assert_eq!(outcome.attempt, 2);
        // 100ms after attempt 0, 200ms after attempt 1
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
