//! Registry watch timing.

use std::time::Duration;

/// Long-poll and backoff settings for one [`Instancer`](super::Instancer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Maximum time the registry may hold a blocking query open.
    pub wait: Duration,
    /// First backoff delay after a failed registry query.
    pub retry_initial: Duration,
    /// Upper bound for the exponential backoff.
    pub retry_max: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(30),
            retry_initial: Duration::from_millis(250),
            retry_max: Duration::from_secs(10),
        }
    }
}

impl DiscoveryConfig {
    /// Backoff before retry number `failures` (1-based), doubling up to `retry_max`.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.retry_initial
            .saturating_mul(1 << exponent)
            .min(self.retry_max)
    }
}
