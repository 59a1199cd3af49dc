use serde::Deserialize;
use std::time::Duration;

/// Exponential backoff settings for failed `accept()` calls.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 5,
            max_backoff_ms: 1_000,
        }
    }
}

/// Tracks consecutive accept failures.
///
/// Each failure doubles the delay up to the cap; a successful accept resets it, so a transient
/// error costs a few milliseconds while a persistently failing socket never spins hot.
#[derive(Debug)]
pub struct AcceptBackoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl AcceptBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_backoff_ms.max(1));
        let max = Duration::from_millis(config.max_backoff_ms).max(initial);

        Self {
            initial,
            max,
            failures: 0,
        }
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(20);
        self.failures = self.failures.saturating_add(1);

        self.initial
            .checked_mul(1u32 << shift)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
