//! Broker retry policy: capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a publish worker retries transient broker failures before
/// dead-lettering. Retry `n` waits `base_delay * 2^(n-1)`, never more than
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = publish once).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three retries at 200, 400 and 800ms.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before retry number `retry`, counting from 1.
    pub fn backoff(&self, retry: u32) -> Duration {
        let Some(exp) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        2u32.checked_pow(exp)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// `retries_done` retries have already happened.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_200_400_800() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(100, Duration::from_millis(200)).with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        // 2^63 does not fit a u32 factor.
        assert_eq!(policy.backoff(64), Duration::from_millis(500));
    }

    #[test]
    fn zero_retries_publishes_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert!(!policy.should_retry(0));
    }
}
