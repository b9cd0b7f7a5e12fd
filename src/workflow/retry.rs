use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Whether a failed dispatch attempt should be repeated, and after how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub wait_before_retry: Duration,
}

impl RetryDecision {
    fn give_up() -> Self {
        Self {
            should_retry: false,
            wait_before_retry: Duration::ZERO,
        }
    }
}

/// Retry behaviour for the dispatch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_wait: Duration,
    /// Multiplier applied to the wait after every further failure.
    pub backoff_rate: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait: Duration::from_secs(6 * 60),
            backoff_rate: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt `attempt` (1-based).
    /// wait = initial_wait * backoff_rate^(attempt - 1), saturating at
    /// `Duration::MAX`.
    pub fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_wait.as_secs_f64() * self.backoff_rate.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Decide what to do after attempt `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: u32, error: &StepError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::give_up();
        }
        RetryDecision {
            should_retry: true,
            wait_before_retry: self.wait_for_attempt(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> StepError {
        StepError::QuotaExceeded("ServiceQuotaExceededException".into())
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_wait, Duration::from_secs(360));
        assert_eq!(policy.backoff_rate, 2.0);
    }

    #[test]
    fn exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_wait: Duration::from_secs(1),
            backoff_rate: 2.0,
        };
        assert_eq!(policy.wait_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.wait_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.wait_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.wait_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn quota_retries_twice_with_doubling_wait() {
        let policy = RetryPolicy::default();

        let first = policy.decide(1, &quota());
        assert!(first.should_retry);
        assert_eq!(first.wait_before_retry, Duration::from_secs(6 * 60));

        let second = policy.decide(2, &quota());
        assert!(second.should_retry);
        assert_eq!(second.wait_before_retry, Duration::from_secs(12 * 60));

        let third = policy.decide(3, &quota());
        assert!(!third.should_retry);
    }

    #[test]
    fn non_quota_error_is_never_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, &StepError::Dispatch("access denied".into()));
        assert!(!decision.should_retry);
        assert_eq!(decision.wait_before_retry, Duration::ZERO);
    }

    #[test]
    fn long_attempt_budget_saturates_wait() {
        let policy = RetryPolicy {
            max_attempts: 100,
            ..Default::default()
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..100 {
            let decision = policy.decide(attempt, &quota());
            assert!(decision.should_retry);
            assert!(decision.wait_before_retry >= previous);
            previous = decision.wait_before_retry;
        }
        assert_eq!(policy.wait_for_attempt(99), Duration::MAX);
        assert!(!policy.decide(100, &quota()).should_retry);
    }

    #[test]
    fn infinite_rate_saturates_wait() {
        let policy = RetryPolicy {
            backoff_rate: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(policy.wait_for_attempt(2), Duration::MAX);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        };
        assert!(!policy.decide(1, &quota()).should_retry);
    }
}
