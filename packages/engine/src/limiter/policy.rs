//! Bounded-attempt retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Max attempts plus an exponential backoff schedule.
///
/// The router uses it to bound how many providers one request may try, and
/// the rate limiter uses the schedule for cooldowns after a provider 429.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            initial_backoff_ms: 2_000,
            multiplier: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.multiplier = multiplier;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    /// Backoff before retry number `attempt` (0-based), capped at the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Attempts allowed given `available` candidates.
    pub fn attempts_for(&self, available: usize) -> usize {
        self.max_attempts.max(1).min(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(16));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn attempts_bounded_by_candidates() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.attempts_for(9), 3);
        assert_eq!(policy.attempts_for(2), 2);
        assert_eq!(RetryPolicy::new(0).attempts_for(5), 1);
    }

    #[test]
    fn immediate_policy_never_waits() {
        assert_eq!(RetryPolicy::immediate(4).backoff(5), Duration::ZERO);
    }
}
