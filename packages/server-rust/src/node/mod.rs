//! A domain service node: one service behind HTTP and RPC listeners.
//!
//! Startup order matters. The RPC listener is bound first so its real port
//! feeds the registration id and the id generator, then the HTTP listener,
//! and only then is the node announced to the registry.

use std::sync::Arc;

use storefront_core::ids::MAX_NODE_ID;
use storefront_core::{service_names, IdGenerator};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::discovery::{HealthCheck, Registration, RegistryClient};
use crate::network::{HttpServer, NetworkConfig, ShutdownController};
use crate::service::api::{Apis, OrderApi, ProductApi, UserApi};
use crate::service::config::{ChainConfig, DomainConfig};
use crate::service::domain::{OrderService, ProductService, UserService};
use crate::storage::{self, StorageConfig, Stores};
use crate::transport;
use crate::transport::rpc::{RpcServer, DEFAULT_MAX_FRAME_LEN};

/// The services a node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceKind {
    Product,
    User,
    Order,
}

impl ServiceKind {
    pub const ALL: [Self; 3] = [Self::Product, Self::User, Self::Order];

    /// Registry name of the service.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Product => service_names::PRODUCT,
            Self::User => service_names::USER,
            Self::Order => service_names::ORDER,
        }
    }

    /// The operation set of this service, served by local chains.
    #[must_use]
    pub fn apis(
        self,
        stores: &Stores,
        domain: &DomainConfig,
        chain: &ChainConfig,
        ids: IdGenerator,
    ) -> Apis {
        match self {
            Self::Product => Apis {
                product: Some(ProductApi::local(
                    &Arc::new(ProductService::new(stores, domain)),
                    chain,
                )),
                ..Apis::default()
            },
            Self::User => Apis {
                user: Some(UserApi::local(
                    &Arc::new(UserService::new(stores, domain)),
                    chain,
                )),
                ..Apis::default()
            },
            Self::Order => Apis {
                order: Some(OrderApi::local(&Arc::new(OrderService::new(stores, ids)), chain)),
                ..Apis::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    /// RPC bind address. Port 0 picks a free port.
    pub rpc_addr: String,
    /// Host other processes use to reach this node.
    pub advertise_host: String,
    pub storage: StorageConfig,
    pub domain: DomainConfig,
    pub chain: ChainConfig,
    pub max_frame_len: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            rpc_addr: "0.0.0.0:0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            storage: StorageConfig::default(),
            domain: DomainConfig::default(),
            chain: ChainConfig::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Runs `service` until the shutdown token fires.
///
/// The node deregisters as soon as shutdown starts, then drains.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound, the stores cannot be
/// opened, the registry rejects the registration, or a server fails.
pub async fn run(
    service: ServiceKind,
    config: NodeConfig,
    registry: Arc<dyn RegistryClient>,
    shutdown: Arc<ShutdownController>,
) -> anyhow::Result<()> {
    let rpc_listener = TcpListener::bind(&config.rpc_addr).await?;
    let rpc_port = rpc_listener.local_addr()?.port();

    let stores = storage::open(&config.storage)?;
    let ids = IdGenerator::new(rpc_port & MAX_NODE_ID);
    let apis = service.apis(&stores, &config.domain, &config.chain, ids);

    let mut http = HttpServer::new(config.network.clone(), Arc::clone(&shutdown));
    let http_addr = http.start().await?;

    let rpc = RpcServer::new(apis.method_router(), Arc::clone(&shutdown))
        .with_max_frame_len(config.max_frame_len);
    let rpc_task = tokio::spawn(rpc.serve(rpc_listener));

    let registration = Registration::new(service.name(), &config.advertise_host, rpc_port)
        .with_check(HealthCheck::http(&config.advertise_host, http_addr.port()));
    registry.register(&registration).await?;
    info!(
        service = service.name(),
        id = %registration.id,
        http = %http_addr,
        rpc = rpc_port,
        "node registered"
    );

    let withdraw = async {
        shutdown.token().cancelled().await;
        match registry.deregister(&registration.id).await {
            Ok(()) => info!(id = %registration.id, "node deregistered"),
            Err(e) => warn!(id = %registration.id, error = %e, "deregistration failed"),
        }
    };
    let (served, ()) = tokio::join!(http.serve(transport::router(&apis), None), withdraw);

    rpc_task.await??;
    served
}
