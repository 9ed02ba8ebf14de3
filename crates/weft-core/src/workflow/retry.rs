use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::StepError;

/// Predicate deciding whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&StepError) -> bool + Send + Sync>;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay each time.
    Fixed(Duration),
    /// Delay grows by `base` per attempt.
    Linear { base: Duration, max: Duration },
    /// Delay doubles each attempt: `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Linear { base, max } => base.saturating_mul(attempt.saturating_add(1)).min(max),
            Self::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Per-step retry policy.
///
/// With `max_attempts = N` a step runs at most `N + 1` times: the initial
/// attempt plus `N` retries.
#[derive(Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff: Backoff,
    retryable: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("custom_predicate", &self.retryable.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            backoff: Backoff::default(),
            retryable: None,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            enabled: true,
            max_attempts,
            backoff: Backoff::Fixed(delay),
            retryable: None,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            enabled: true,
            max_attempts,
            backoff: Backoff::Exponential { base, max },
            retryable: None,
        }
    }

    /// Exponential policy using configured defaults.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::exponential(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Replace the default retry classification for failures and timeouts.
    /// Validation errors, panics and cancellations are never retried.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StepError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    pub fn is_retryable(&self, error: &StepError) -> bool {
        if matches!(
            error,
            StepError::Validation { .. } | StepError::Panicked { .. } | StepError::Cancelled
        ) {
            return false;
        }
        match &self.retryable {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }

    /// Delay before the attempt following the zero-based `attempt`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Highest zero-based attempt index this policy allows.
    pub fn last_attempt(&self) -> u32 {
        if self.enabled {
            self.max_attempts
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_max_backoff_cap() {
        let policy = RetryPolicy::exponential(40, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(39), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff::Linear {
            base: Duration::from_millis(50),
            max: Duration::from_millis(120),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(50));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(120));
    }

    #[test]
    fn test_disabled_policy_has_single_attempt() {
        let policy = RetryPolicy::none();
        assert!(!policy.enabled);
        assert_eq!(policy.last_attempt(), 0);
    }

    #[test]
    fn test_custom_predicate_overrides_default() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO).retry_if(|e| e.is_timeout());
        assert!(!policy.is_retryable(&StepError::transient("flaky")));
        assert!(policy.is_retryable(&StepError::timed_out(Duration::from_secs(1))));
    }

    #[test]
    fn test_custom_predicate_cannot_retry_terminal_errors() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO).retry_if(|_| true);
        assert!(policy.is_retryable(&StepError::fatal("bad gateway")));
        assert!(!policy.is_retryable(&StepError::Panicked {
            message: "boom".into()
        }));
        assert!(!policy.is_retryable(&StepError::Cancelled));
        assert!(!policy.is_retryable(&StepError::validation("empty url")));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig::default());
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, RetryConfig::default().max_attempts);
    }
}
