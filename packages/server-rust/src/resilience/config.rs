//! Retry and circuit-breaker settings shared by every dispatcher.

use std::time::Duration;

/// Attempt budget for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    /// Wall-clock budget shared by all attempts of one call.
    pub total_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            total_timeout: Duration::from_millis(500),
        }
    }
}

/// Circuit-breaker thresholds, applied per (service, operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker. Zero is treated as one.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Everything a dispatcher needs; built once and cloned into every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}
