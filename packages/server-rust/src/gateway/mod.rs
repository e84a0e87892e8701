//! The public gateway: the HTTP route table backed by dispatchers.
//!
//! One [`Instancer`] watches each backend service, and every operation gets
//! its own endpointer, round-robin balancer, breaker and retry budget. The
//! HTTP layer only sees the operation sets, as on a service node.

pub mod dispatch;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_core::service_names;
use tracing::info;

pub use dispatch::{dispatcher, Dispatcher, FactorySource};

use crate::discovery::{DiscoveryConfig, Endpointer, Instancer, RegistryClient};
use crate::network::{HttpServer, NetworkConfig, ShutdownController, UpstreamStatus};
use crate::resilience::DispatchConfig;
use crate::service::api::{Apis, OperationSource, OrderApi, ProductApi, UserApi};
use crate::service::operation::BoxOperation;
use crate::transport;
use crate::transport::rpc::RpcClientConfig;

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
    pub rpc: RpcClientConfig,
}

/// Endpointers are kept type-erased so the gateway can wait on all of them.
#[async_trait]
trait Settle: Send + Sync {
    async fn settled(&self);
}

#[async_trait]
impl<Req, Resp> Settle for Endpointer<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    async fn settled(&self) {
        Endpointer::settled(self).await;
    }
}

/// Builds dispatchers over the registry, one instancer per service.
pub struct Gateway<F = RpcClientConfig> {
    registry: Arc<dyn RegistryClient>,
    discovery: DiscoveryConfig,
    dispatch: DispatchConfig,
    factories: F,
    instancers: DashMap<String, Instancer>,
    endpointers: Mutex<Vec<Arc<dyn Settle>>>,
}

impl<F: FactorySource> Gateway<F> {
    /// Starts watching every known service.
    #[must_use]
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        discovery: DiscoveryConfig,
        dispatch: DispatchConfig,
        factories: F,
    ) -> Self {
        let gateway = Self {
            registry,
            discovery,
            dispatch,
            factories,
            instancers: DashMap::new(),
            endpointers: Mutex::new(Vec::new()),
        };
        for service in service_names::ALL {
            gateway.instances(service);
        }
        gateway
    }

    /// Operation sets for every service, each backed by dispatchers.
    #[must_use]
    pub fn apis(&self) -> Apis {
        Apis {
            product: Some(ProductApi::remote(self)),
            user: Some(UserApi::remote(self)),
            order: Some(OrderApi::remote(self)),
        }
    }

    /// Waits until every dispatcher built so far has applied its first
    /// instance set.
    pub async fn settled(&self) {
        let endpointers = self.endpointers.lock().clone();
        for endpointer in endpointers {
            endpointer.settled().await;
        }
    }

    fn instances(&self, service: &str) -> crate::discovery::InstanceReceiver {
        self.instancers
            .entry(service.to_string())
            .or_insert_with(|| {
                info!(service, "watching service");
                Instancer::spawn(Arc::clone(&self.registry), service, self.discovery)
            })
            .subscribe()
    }
}

impl<F: FactorySource> OperationSource for Gateway<F> {
    fn operation<Req, Resp>(&self, method: &'static str) -> BoxOperation<Req, Resp>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static,
    {
        let service = method.split_once('.').map_or(method, |(service, _)| service);
        let built = dispatcher(
            method,
            self.instances(service),
            self.factories.factory::<Req, Resp>(method),
            &self.dispatch,
        );
        self.endpointers.lock().push(built.endpointer);
        built.operation
    }
}

impl<F: FactorySource> UpstreamStatus for Gateway<F> {
    fn instance_counts(&self) -> BTreeMap<String, usize> {
        self.instancers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().current().len()))
            .collect()
    }
}

/// Serves the gateway until the shutdown token fires.
///
/// # Errors
///
/// Returns an error if the HTTP listener cannot be bound or fails.
pub async fn run(
    config: GatewayConfig,
    registry: Arc<dyn RegistryClient>,
    shutdown: Arc<ShutdownController>,
) -> anyhow::Result<()> {
    let gateway = Arc::new(Gateway::new(
        registry,
        config.discovery,
        config.dispatch,
        config.rpc,
    ));
    let routes = transport::router(&gateway.apis());

    let mut http = HttpServer::new(config.network, shutdown);
    let addr = http.start().await?;
    info!(%addr, "gateway listening");

    http.serve(routes, Some(gateway as Arc<dyn UpstreamStatus>))
        .await
}

#[cfg(test)]
mod tests;
