//! Instance pool for one named service.
//!
//! A background task long-polls the registry and publishes the full set of
//! healthy instances on a `watch` channel. Registry failures never reach
//! subscribers: the last-known-good set stays published while the task backs
//! off and retries.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::config::DiscoveryConfig;
use super::instance::Instance;
use super::registry::{RegistryClient, WatchResult};

/// Healthy instances of a service, sorted by address.
pub type InstanceSet = Arc<Vec<Instance>>;

/// Receives instance sets. `None` until the registry answered once.
pub type InstanceReceiver = watch::Receiver<Option<InstanceSet>>;

/// Subscription to the healthy instances of one service.
///
/// Dropping the `Instancer` stops the watch task.
#[derive(Debug)]
pub struct Instancer {
    service: String,
    sets: InstanceReceiver,
    _stop: DropGuard,
}

impl Instancer {
    /// Starts watching `service`.
    #[must_use]
    pub fn spawn(
        registry: Arc<dyn RegistryClient>,
        service: impl Into<String>,
        config: DiscoveryConfig,
    ) -> Self {
        let service = service.into();
        let (tx, sets) = watch::channel(None);
        let stop = CancellationToken::new();
        tokio::spawn(watch_loop(
            registry,
            service.clone(),
            config,
            tx,
            stop.clone(),
        ));
        Self {
            service,
            sets,
            _stop: stop.drop_guard(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// A receiver holding the current set plus change notifications.
    #[must_use]
    pub fn subscribe(&self) -> InstanceReceiver {
        self.sets.clone()
    }

    /// The current set; empty until the registry answered once.
    #[must_use]
    pub fn current(&self) -> InstanceSet {
        self.sets.borrow().clone().unwrap_or_default()
    }
}

fn healthy_sorted(instances: Vec<Instance>) -> Vec<Instance> {
    let mut healthy: Vec<Instance> = instances.into_iter().filter(|i| i.healthy).collect();
    healthy.sort();
    healthy.dedup_by(|a, b| a.address == b.address);
    healthy
}

async fn watch_loop(
    registry: Arc<dyn RegistryClient>,
    service: String,
    config: DiscoveryConfig,
    tx: watch::Sender<Option<InstanceSet>>,
    stop: CancellationToken,
) {
    let mut index = 0_u64;
    let mut failures = 0_u32;

    loop {
        let result = tokio::select! {
            () = stop.cancelled() => break,
            result = registry.watch(&service, index, config.wait) => result,
        };

        match result {
            Ok(WatchResult {
                index: next,
                instances,
            }) => {
                if failures > 0 {
                    info!(service = %service, failures, "registry reachable again");
                }
                failures = 0;
                // A lower index means the registry state was reset.
                index = if next < index { 0 } else { next.max(1) };

                let healthy = healthy_sorted(instances);
                tx.send_if_modified(|current| {
                    if current.as_deref() == Some(&healthy) {
                        return false;
                    }
                    info!(
                        service = %service,
                        instances = healthy.len(),
                        addresses = ?healthy.iter().map(|i| i.address.as_str()).collect::<Vec<_>>(),
                        "instance set changed"
                    );
                    *current = Some(Arc::new(healthy));
                    true
                });
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = config.backoff(failures);
                warn!(
                    service = %service,
                    error = %err,
                    failures,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "registry query failed, keeping last known instances"
                );
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!(service = %service, "instance watch stopped");
}
