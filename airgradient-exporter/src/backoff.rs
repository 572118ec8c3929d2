//! Delay computation between failed poll cycles.

use std::time::Duration;

use crate::config::RetryPolicy;

/// Yields the delay before the next attempt after a failed cycle.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    policy: RetryPolicy,
    current: Duration,
}

impl RetryBackoff {
    /// Create a backoff for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current: Self::initial_delay(policy),
        }
    }

    fn initial_delay(policy: RetryPolicy) -> Duration {
        match policy {
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryPolicy::Exponential { initial_ms, .. } => Duration::from_millis(initial_ms),
        }
    }

    /// Delay to wait after a failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if let RetryPolicy::Exponential { max_ms, .. } = self.policy {
            self.current = self
                .current
                .saturating_mul(2)
                .min(Duration::from_millis(max_ms));
        }
        delay
    }

    /// Reset after a successful cycle.
    pub fn reset(&mut self) {
        self.current = Self::initial_delay(self.policy);
    }
}
