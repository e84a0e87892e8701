//! Bounded retries and per-operation circuit breaking.

pub mod breaker;
pub mod config;
pub mod retry;

pub use breaker::{BreakerPermit, BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, DispatchConfig, RetryConfig};
pub use retry::Retry;
