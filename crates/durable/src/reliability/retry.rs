//! Retry policy implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityErrorKind;

/// Per-step retry configuration
///
/// Delays grow exponentially from `first_interval` and are a pure function of
/// the attempt number, so replaying the same history always yields the same
/// waits. No jitter is applied.
///
/// # Example
///
/// ```
/// use orchestra_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, Duration::from_millis(1000), 2.0);
///
/// assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
/// assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(rename = "firstIntervalMs", with = "crate::serde_millis")]
    pub first_interval: Duration,

    /// Multiplier applied per further attempt
    pub backoff_coefficient: f64,

    /// Upper bound for a single delay
    #[serde(
        rename = "maxIntervalMs",
        with = "crate::serde_millis::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_interval: Option<Duration>,
}

/// Outcome of consulting a policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule the next attempt once the delay has elapsed
    RetryAfter(Duration),

    /// The step has failed for good
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure was classified as not worth retrying
    Permanent,

    /// Transient failures used up every allowed attempt
    Exhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, first_interval: Duration, backoff_coefficient: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            first_interval,
            backoff_coefficient,
            max_interval: None,
        }
    }

    /// Exponential backoff: `first_interval * coefficient^(attempt-1)`
    pub fn exponential(max_attempts: u32, first_interval: Duration, backoff_coefficient: f64) -> Self {
        Self::new(max_attempts, first_interval, backoff_coefficient)
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::new(max_attempts, interval, 1.0)
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Delay to wait after attempt `attempt` (1-based) has failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);

        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Decide what happens after attempt `attempt` failed with `kind`
    pub fn decide(&self, attempt: u32, kind: ActivityErrorKind) -> RetryDecision {
        match kind {
            ActivityErrorKind::Permanent => RetryDecision::GiveUp(GiveUpReason::Permanent),
            ActivityErrorKind::Transient if !self.has_attempts_remaining(attempt) => {
                RetryDecision::GiveUp(GiveUpReason::Exhausted)
            }
            ActivityErrorKind::Transient => RetryDecision::RetryAfter(self.delay_after(attempt)),
        }
    }
}
