//! Caller-side retry policy
//!
//! The pool never retries. A caller that wants retries inspects each failed
//! result, asks the policy for a delay, and resubmits the payload as a new job.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::job::{JobError, JobErrorKind};

/// Backoff policy for resubmitting failed jobs
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use workpool::job::JobError;
/// use workpool::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(3)
///     .with_initial_interval(Duration::from_millis(100))
///     .with_jitter(0.0);
///
/// let error = JobError::failed("upstream unavailable");
/// assert_eq!(policy.next_delay(&error, 1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay(&error, 2), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay(&error, 3), None); // out of attempts
///
/// // Crashes and cancellations are not retried by default
/// assert_eq!(policy.next_delay(&JobError::internal_fault("panic"), 1), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first resubmission
    #[serde(with = "crate::duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound on any delay
    #[serde(with = "crate::duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10%
    pub jitter: f64,

    /// Error kinds that are never retried
    #[serde(default = "default_non_retryable")]
    pub non_retryable: Vec<JobErrorKind>,
}

fn default_non_retryable() -> Vec<JobErrorKind> {
    vec![JobErrorKind::InternalFault, JobErrorKind::Cancelled]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 5 attempts, 1s initial, 60s cap, 2x, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable: default_non_retryable(),
        }
    }

    /// Never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable: default_non_retryable(),
        }
    }

    /// Fixed interval, no backoff
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable: default_non_retryable(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the set of error kinds that are never retried
    pub fn with_non_retryable(mut self, kinds: impl IntoIterator<Item = JobErrorKind>) -> Self {
        self.non_retryable = kinds.into_iter().collect();
        self
    }

    /// Delay before resubmitting after `attempts_made` failed attempts
    ///
    /// The first resubmission waits `initial_interval`; each later one is
    /// multiplied by the backoff coefficient and capped at `max_interval`.
    pub fn delay_for_retry(&self, attempts_made: u32) -> Duration {
        let exponent = i32::try_from(attempts_made.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            (capped + rand::thread_rng().gen_range(-range..=range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether `error` is of a retryable kind
    pub fn should_retry(&self, error: &JobError) -> bool {
        !self.non_retryable.contains(&error.kind)
    }

    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before resubmitting, or `None` if the job should not be retried
    pub fn next_delay(&self, error: &JobError, attempts_made: u32) -> Option<Duration> {
        (self.should_retry(error) && self.has_attempts_remaining(attempts_made))
            .then(|| self.delay_for_retry(attempts_made))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(
            policy.non_retryable,
            vec![JobErrorKind::InternalFault, JobErrorKind::Cancelled]
        );
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.next_delay(&JobError::failed("x"), 1), None);
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10), 3).with_jitter(0.2);
        for _ in 0..100 {
            let delay = policy.delay_for_retry(1);
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
        }
    }

    #[test]
    fn test_zero_interval_with_jitter() {
        let policy = RetryPolicy::fixed(Duration::ZERO, 3).with_jitter(0.5);
        assert_eq!(policy.delay_for_retry(1), Duration::ZERO);
    }

    #[test]
    fn test_kind_filter() {
        let policy = RetryPolicy::exponential();
        assert!(policy.should_retry(&JobError::failed("timeout")));
        assert!(!policy.should_retry(&JobError::internal_fault("panic")));
        assert!(!policy.should_retry(&JobError::cancelled("stop")));

        let everything = policy.with_non_retryable([]);
        assert!(everything.should_retry(&JobError::internal_fault("panic")));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(10)
            .with_non_retryable([JobErrorKind::Failed]);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["initial_interval"], 1000);
        assert_eq!(json["non_retryable"], serde_json::json!(["failed"]));

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[test]
    fn test_missing_non_retryable_uses_defaults() {
        let parsed: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 2, "initial_interval": 10, "max_interval": 10,
                "backoff_coefficient": 1.0, "jitter": 0.0}"#,
        )
        .unwrap();
        assert_eq!(parsed.non_retryable.len(), 2);
    }
}
