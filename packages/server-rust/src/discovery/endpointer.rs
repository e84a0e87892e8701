//! Live set of callable operations, one per healthy instance.
//!
//! The update task diffs each new instance set against the current entries:
//! kept addresses are untouched, new ones are built through the
//! [`EndpointFactory`], removed ones are released. Every applied set is
//! published whole through an `ArcSwap`, so readers only ever see complete
//! snapshots. Removed entries are released only after the snapshot without
//! them is published.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::instance::Instance;
use super::instancer::{InstanceReceiver, InstanceSet};
use crate::service::operation::BoxOperation;

/// Releases whatever an endpoint holds (typically closes its connection).
pub type Release = Box<dyn FnOnce() + Send + Sync>;

/// One callable operation bound to one instance.
pub struct Endpoint<Req, Resp> {
    pub instance: Instance,
    pub operation: BoxOperation<Req, Resp>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            operation: Arc::clone(&self.operation),
        }
    }
}

impl<Req, Resp> std::fmt::Debug for Endpoint<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the live endpoints, sorted by address.
pub type EndpointSet<Req, Resp> = Arc<Vec<Endpoint<Req, Resp>>>;

/// Builds the callable operation for one instance.
#[async_trait]
pub trait EndpointFactory<Req, Resp>: Send + Sync + 'static {
    /// Returns the bound operation and the closure that releases it.
    async fn build(&self, instance: &Instance)
        -> anyhow::Result<(BoxOperation<Req, Resp>, Release)>;
}

/// Anything that hands out endpoint snapshots.
pub trait EndpointSource<Req, Resp>: Send + Sync {
    fn endpoints(&self) -> EndpointSet<Req, Resp>;
}

impl<Req, Resp> EndpointSource<Req, Resp> for ArcSwap<Vec<Endpoint<Req, Resp>>>
where
    Req: Send + Sync,
    Resp: Send + Sync,
{
    fn endpoints(&self) -> EndpointSet<Req, Resp> {
        self.load_full()
    }
}

struct Entry<Req, Resp> {
    endpoint: Endpoint<Req, Resp>,
    release: Option<Release>,
}

impl<Req, Resp> Entry<Req, Resp> {
    fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Maintains the endpoint set of one operation.
///
/// Dropping the `Endpointer` stops the update task, which then releases every
/// remaining entry.
pub struct Endpointer<Req, Resp> {
    name: String,
    current: Arc<ArcSwap<Vec<Endpoint<Req, Resp>>>>,
    settled: watch::Receiver<bool>,
    _stop: DropGuard,
}

impl<Req, Resp> Endpointer<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Starts following `sets`, building entries with `factory`.
    pub fn spawn(
        name: impl Into<String>,
        sets: InstanceReceiver,
        factory: Arc<dyn EndpointFactory<Req, Resp>>,
    ) -> Self {
        let name = name.into();
        let current = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let (settled_tx, settled) = watch::channel(false);
        let stop = CancellationToken::new();
        tokio::spawn(update_loop(
            name.clone(),
            sets,
            factory,
            Arc::clone(&current),
            settled_tx,
            stop.clone(),
        ));
        Self {
            name,
            current,
            settled,
            _stop: stop.drop_guard(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the first instance set has been applied.
    pub async fn settled(&self) {
        let mut settled = self.settled.clone();
        // An error means the task is gone; nothing more will be applied.
        let _ = settled.wait_for(|done| *done).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl<Req, Resp> EndpointSource<Req, Resp> for Endpointer<Req, Resp>
where
    Req: Send + Sync,
    Resp: Send + Sync,
{
    fn endpoints(&self) -> EndpointSet<Req, Resp> {
        self.current.load_full()
    }
}

impl<Req, Resp> std::fmt::Debug for Endpointer<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpointer")
            .field("name", &self.name)
            .field("endpoints", &self.current.load().len())
            .finish()
    }
}

/// Builds entries for new instances and takes out the removed ones.
///
/// The removed entries are returned unreleased: they stay callable until the
/// snapshot without them has been published.
async fn apply<Req: 'static, Resp: 'static>(
    name: &str,
    instances: &InstanceSet,
    entries: &mut BTreeMap<String, Entry<Req, Resp>>,
    factory: &dyn EndpointFactory<Req, Resp>,
) -> Vec<Entry<Req, Resp>> {
    for instance in instances.iter() {
        if entries.contains_key(&instance.address) {
            continue;
        }
        match factory.build(instance).await {
            Ok((operation, release)) => {
                debug!(endpointer = name, address = %instance.address, "endpoint built");
                entries.insert(
                    instance.address.clone(),
                    Entry {
                        endpoint: Endpoint {
                            instance: instance.clone(),
                            operation,
                        },
                        release: Some(release),
                    },
                );
            }
            Err(err) => warn!(
                endpointer = name,
                address = %instance.address,
                error = %format!("{err:#}"),
                "failed to build endpoint, skipping instance"
            ),
        }
    }

    let removed: Vec<String> = entries
        .keys()
        .filter(|address| !instances.iter().any(|i| &i.address == *address))
        .cloned()
        .collect();
    removed
        .iter()
        .filter_map(|address| entries.remove(address))
        .collect()
}

async fn update_loop<Req, Resp>(
    name: String,
    mut sets: InstanceReceiver,
    factory: Arc<dyn EndpointFactory<Req, Resp>>,
    current: Arc<ArcSwap<Vec<Endpoint<Req, Resp>>>>,
    settled: watch::Sender<bool>,
    stop: CancellationToken,
) where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    let mut entries: BTreeMap<String, Entry<Req, Resp>> = BTreeMap::new();

    loop {
        let next = sets.borrow_and_update().clone();
        if let Some(instances) = next {
            let removed = apply(&name, &instances, &mut entries, factory.as_ref()).await;
            let snapshot: Vec<Endpoint<Req, Resp>> =
                entries.values().map(|entry| entry.endpoint.clone()).collect();
            info!(endpointer = %name, endpoints = snapshot.len(), "endpoint set updated");
            current.store(Arc::new(snapshot));
            settled.send_replace(true);
            for entry in removed {
                debug!(endpointer = %name, address = %entry.endpoint.instance.address, "releasing endpoint");
                entry.release();
            }
        }

        tokio::select! {
            () = stop.cancelled() => break,
            changed = sets.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    current.store(Arc::new(Vec::new()));
    for (_, entry) in std::mem::take(&mut entries) {
        entry.release();
    }
    debug!(endpointer = %name, "endpointer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;
    use crate::service::operation::CallContext;
    use crate::testing::replying;

    #[derive(Default)]
    struct RecordingFactory {
        built: Mutex<Vec<String>>,
        released: Arc<Mutex<Vec<String>>>,
        refuse: Option<String>,
    }

    #[async_trait]
    impl EndpointFactory<(), String> for RecordingFactory {
        async fn build(
            &self,
            instance: &Instance,
        ) -> anyhow::Result<(BoxOperation<(), String>, Release)> {
            if self.refuse.as_deref() == Some(instance.address.as_str()) {
                anyhow::bail!("dial {} refused", instance.address);
            }
            self.built.lock().push(instance.address.clone());
            let released = Arc::clone(&self.released);
            let address = instance.address.clone();
            Ok((
                replying(instance.address.clone()),
                Box::new(move || released.lock().push(address)),
            ))
        }
    }

    fn set(addresses: &[&str]) -> Option<InstanceSet> {
        Some(Arc::new(
            addresses
                .iter()
                .map(|a| Instance::new(format!("svc-{a}"), *a))
                .collect(),
        ))
    }

    fn addresses<Req, Resp>(set: &EndpointSet<Req, Resp>) -> Vec<String> {
        set.iter().map(|e| e.instance.address.clone()).collect()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn diffs_sets_and_releases_removed() {
        let (tx, rx) = watch::channel(set(&["10.0.0.1:9000", "10.0.0.2:9000"]));
        let factory = Arc::new(RecordingFactory::default());
        let endpointer: Endpointer<(), String> = Endpointer::spawn("productsvc.GetProducts", rx, factory.clone());
        endpointer.settled().await;
        assert_eq!(
            addresses(&endpointer.endpoints()),
            ["10.0.0.1:9000", "10.0.0.2:9000"]
        );

        tx.send_replace(set(&["10.0.0.2:9000", "10.0.0.3:9000"]));
        eventually(|| factory.released.lock().len() == 1).await;
        eventually(|| endpointer.len() == 2 && factory.built.lock().len() == 3).await;

        assert_eq!(*factory.released.lock(), ["10.0.0.1:9000"]);
        assert_eq!(
            addresses(&endpointer.endpoints()),
            ["10.0.0.2:9000", "10.0.0.3:9000"]
        );
        // 10.0.0.2 was kept, not rebuilt.
        assert_eq!(
            factory.built.lock().iter().filter(|a| *a == "10.0.0.2:9000").count(),
            1
        );
    }

    /// Blocks building `gated` until `open` is notified.
    struct GatedFactory {
        gated: String,
        building: Notify,
        open: Notify,
        released: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EndpointFactory<(), String> for GatedFactory {
        async fn build(
            &self,
            instance: &Instance,
        ) -> anyhow::Result<(BoxOperation<(), String>, Release)> {
            if instance.address == self.gated {
                self.building.notify_one();
                self.open.notified().await;
            }
            let released = Arc::clone(&self.released);
            let address = instance.address.clone();
            Ok((
                replying(instance.address.clone()),
                Box::new(move || released.lock().push(address)),
            ))
        }
    }

    #[tokio::test]
    async fn removed_endpoints_stay_live_until_replacements_are_published() {
        let (tx, rx) = watch::channel(set(&["10.0.0.1:9000"]));
        let factory = Arc::new(GatedFactory {
            gated: "10.0.0.2:9000".into(),
            building: Notify::new(),
            open: Notify::new(),
            released: Arc::default(),
        });
        let endpointer: Endpointer<(), String> =
            Endpointer::spawn("productsvc.GetProducts", rx, factory.clone());
        endpointer.settled().await;

        tx.send_replace(set(&["10.0.0.2:9000"]));
        factory.building.notified().await;

        assert!(factory.released.lock().is_empty());
        assert_eq!(addresses(&endpointer.endpoints()), ["10.0.0.1:9000"]);
        let reply = endpointer.endpoints()[0]
            .operation
            .call(CallContext::new("productsvc.GetProducts"), ())
            .await
            .unwrap();
        assert_eq!(reply.value().map(String::as_str), Some("10.0.0.1:9000"));

        factory.open.notify_one();
        eventually(|| factory.released.lock().len() == 1).await;
        assert_eq!(*factory.released.lock(), ["10.0.0.1:9000"]);
        assert_eq!(addresses(&endpointer.endpoints()), ["10.0.0.2:9000"]);
    }

    #[tokio::test]
    async fn build_failure_skips_only_that_instance() {
        let (_tx, rx) = watch::channel(set(&["10.0.0.1:9000", "10.0.0.2:9000"]));
        let factory = Arc::new(RecordingFactory {
            refuse: Some("10.0.0.1:9000".into()),
            ..RecordingFactory::default()
        });
        let endpointer: Endpointer<(), String> = Endpointer::spawn("usersvc.GetUser", rx, factory);
        endpointer.settled().await;
        assert_eq!(addresses(&endpointer.endpoints()), ["10.0.0.2:9000"]);
    }

    #[tokio::test]
    async fn drop_releases_everything() {
        let (_tx, rx) = watch::channel(set(&["10.0.0.1:9000", "10.0.0.2:9000"]));
        let factory = Arc::new(RecordingFactory::default());
        let released = Arc::clone(&factory.released);
        let endpointer: Endpointer<(), String> = Endpointer::spawn("ordersvc.GetOrder", rx, factory);
        endpointer.settled().await;

        drop(endpointer);
        eventually(|| released.lock().len() == 2).await;
    }

    #[tokio::test]
    async fn settled_waits_for_first_set() {
        let (tx, rx) = watch::channel(None);
        let factory = Arc::new(RecordingFactory::default());
        let endpointer: Endpointer<(), String> = Endpointer::spawn("productsvc.Upload", rx, factory);

        let pending = tokio::time::timeout(Duration::from_millis(50), endpointer.settled()).await;
        assert!(pending.is_err());

        tx.send_replace(set(&[]));
        endpointer.settled().await;
        assert!(endpointer.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_a_transient_empty_set() {
        let (tx, rx) = watch::channel(set(&["10.0.0.1:9000"]));
        let factory = Arc::new(RecordingFactory::default());
        let endpointer: Arc<Endpointer<(), String>> = Arc::new(Endpointer::spawn("productsvc.GetProducts", rx, factory));
        endpointer.settled().await;

        let done = Arc::new(AtomicBool::new(false));
        let empties = Arc::new(AtomicU32::new(0));
        let reader = tokio::spawn({
            let endpointer = Arc::clone(&endpointer);
            let done = Arc::clone(&done);
            let empties = Arc::clone(&empties);
            async move {
                while !done.load(Ordering::SeqCst) {
                    if endpointer.endpoints().is_empty() {
                        empties.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                }
            }
        });

        for round in 0..200 {
            let next = if round % 2 == 0 {
                set(&["10.0.0.2:9000"])
            } else {
                set(&["10.0.0.1:9000", "10.0.0.3:9000"])
            };
            tx.send_replace(next);
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        done.store(true, Ordering::SeqCst);
        reader.await.unwrap();

        assert_eq!(empties.load(Ordering::SeqCst), 0);
    }
}
