//! Registry client contract.

use std::time::Duration;

use async_trait::async_trait;

use super::instance::{Instance, Registration};

/// Failures talking to the registry. Never surfaced past the Instancer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),
    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid registry response: {0}")]
    Decode(String),
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}

/// Result of one blocking watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResult {
    /// Opaque change index to pass to the next watch.
    pub index: u64,
    /// Every registered instance of the service, healthy or not.
    pub instances: Vec<Instance>,
}

/// Announce, withdraw and watch service instances.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Announces an instance. Re-registering the same id replaces it.
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError>;

    /// Blocks until the service changes after `after_index`, or `wait` elapses.
    ///
    /// `after_index == 0` returns the current state immediately.
    async fn watch(
        &self,
        service: &str,
        after_index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError>;
}
