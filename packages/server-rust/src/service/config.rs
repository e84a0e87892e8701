use std::time::Duration;

use crate::resilience::BreakerConfig;

/// Settings applied to every operation chain of a domain service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Breaker thresholds for the server-side breaker of each operation.
    pub breaker: BreakerConfig,
    /// Concurrent calls per operation before load shedding. `None` disables it.
    pub max_concurrent_calls: Option<usize>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            max_concurrent_calls: Some(1024),
        }
    }
}

/// Business-layer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    /// HS256 signing secret for login tokens.
    pub jwt_secret: String,
    /// Lifetime of issued tokens.
    pub token_ttl: Duration,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "storefront-dev-secret".to_string(),
            token_ttl: Duration::from_secs(3600),
            max_upload_bytes: 4 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let chain = ChainConfig::default();
        assert_eq!(chain.max_concurrent_calls, Some(1024));
        assert_eq!(chain.breaker.failure_threshold, 5);

        let domain = DomainConfig::default();
        assert_eq!(domain.token_ttl, Duration::from_secs(3600));
        assert_eq!(domain.max_upload_bytes, 4_194_304);
    }
}
