//! In-process registry with blocking watches.
//!
//! Used by the `dev` process mode and by tests. Supports toggling instance
//! health and simulating a full registry outage.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::instance::{Instance, Registration};
use super::registry::{RegistryClient, RegistryError, WatchResult};

#[derive(Debug, Default)]
struct ServiceEntry {
    index: u64,
    instances: BTreeMap<String, Instance>,
}

#[derive(Debug)]
struct State {
    counter: u64,
    offline: bool,
    services: HashMap<String, ServiceEntry>,
    /// instance id -> service name
    owners: HashMap<String, String>,
}

impl State {
    fn bump(&mut self, service: &str) -> u64 {
        self.counter += 1;
        let counter = self.counter;
        self.services.entry(service.to_string()).or_default().index = counter;
        counter
    }

    fn snapshot(&self, service: &str) -> WatchResult {
        match self.services.get(service) {
            Some(entry) => WatchResult {
                index: entry.index.max(1),
                instances: entry.instances.values().cloned().collect(),
            },
            None => WatchResult {
                index: 1,
                instances: Vec::new(),
            },
        }
    }
}

/// Registry held entirely in memory.
#[derive(Debug)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(1);
        Self {
            state: Mutex::new(State {
                counter: 1,
                offline: false,
                services: HashMap::new(),
                owners: HashMap::new(),
            }),
            changes,
        }
    }

    /// Marks an instance as passing or failing its health check.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] if the id is not registered.
    pub fn set_healthy(&self, instance_id: &str, healthy: bool) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let service = state
            .owners
            .get(instance_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownInstance(instance_id.to_string()))?;
        let changed = state
            .services
            .get_mut(&service)
            .and_then(|entry| entry.instances.get_mut(instance_id))
            .is_some_and(|instance| {
                let changed = instance.healthy != healthy;
                instance.healthy = healthy;
                changed
            });
        if changed {
            let counter = state.bump(&service);
            drop(state);
            self.changes.send_replace(counter);
        }
        Ok(())
    }

    /// Simulates an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        let counter = {
            let mut state = self.state.lock();
            state.offline = !available;
            state.counter
        };
        self.changes.send_replace(counter);
    }

    /// Current instances of a service, healthy or not.
    #[must_use]
    pub fn instances(&self, service: &str) -> Vec<Instance> {
        self.state.lock().snapshot(service).instances
    }

    fn check_online(state: &State) -> Result<(), RegistryError> {
        if state.offline {
            Err(RegistryError::Unreachable("memory registry offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let counter = {
            let mut state = self.state.lock();
            Self::check_online(&state)?;
            if let Some(previous) = state.owners.get(&registration.id).cloned() {
                if let Some(entry) = state.services.get_mut(&previous) {
                    entry.instances.remove(&registration.id);
                }
                state.bump(&previous);
            }
            state
                .owners
                .insert(registration.id.clone(), registration.service.clone());
            state
                .services
                .entry(registration.service.clone())
                .or_default()
                .instances
                .insert(registration.id.clone(), registration.instance());
            state.bump(&registration.service)
        };
        self.changes.send_replace(counter);
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        let counter = {
            let mut state = self.state.lock();
            Self::check_online(&state)?;
            let Some(service) = state.owners.remove(instance_id) else {
                return Ok(());
            };
            if let Some(entry) = state.services.get_mut(&service) {
                entry.instances.remove(instance_id);
            }
            state.bump(&service)
        };
        self.changes.send_replace(counter);
        Ok(())
    }

    async fn watch(
        &self,
        service: &str,
        after_index: u64,
        wait: Duration,
    ) -> Result<WatchResult, RegistryError> {
        let deadline = Instant::now() + wait;
        let mut changes = self.changes.subscribe();
        loop {
            {
                let state = self.state.lock();
                Self::check_online(&state)?;
                let snapshot = state.snapshot(service);
                if after_index == 0 || snapshot.index != after_index {
                    return Ok(snapshot);
                }
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    let state = self.state.lock();
                    Self::check_online(&state)?;
                    return Ok(state.snapshot(service));
                }
            }
        }
    }
}
