//! Gateway to registry to RPC server, over real sockets.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use storefront_core::model::{GetProductsRequest, GetProductsResponse};
use storefront_core::{method_names, service_names, BusinessError, IdGenerator, Reply};
use tokio::net::TcpListener;
use tower::ServiceExt;

use super::*;
use crate::discovery::{EndpointFactory, Instance, MemoryRegistry, Registration, Release};
use crate::service::config::ChainConfig;
use crate::service::domain::OrderService;
use crate::service::operation::CallError;
use crate::service::router::MethodRouter;
use crate::storage::{open, StorageConfig, Stores};
use crate::testing::{counted, local_apis};
use crate::transport::rpc::{RpcEndpointFactory, RpcServer};

/// Dials a local server in place of each registered address.
#[derive(Clone, Default)]
struct Loopback {
    routes: Arc<DashMap<String, String>>,
}

struct LoopbackFactory<Req, Resp> {
    inner: RpcEndpointFactory<Req, Resp>,
    routes: Arc<DashMap<String, String>>,
}

#[async_trait]
impl<Req, Resp> EndpointFactory<Req, Resp> for LoopbackFactory<Req, Resp>
where
    Req: Serialize + Send + Sync + 'static,
    Resp: DeserializeOwned + Send + Sync + 'static,
{
    async fn build(
        &self,
        instance: &Instance,
    ) -> anyhow::Result<(BoxOperation<Req, Resp>, Release)> {
        let target = self
            .routes
            .get(&instance.address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow::anyhow!("no loopback for {}", instance.address))?;
        self.inner
            .build(&Instance::new(instance.id.clone(), target))
            .await
    }
}

impl FactorySource for Loopback {
    fn factory<Req, Resp>(&self, method: &'static str) -> Arc<dyn EndpointFactory<Req, Resp>>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new(LoopbackFactory {
            inner: RpcEndpointFactory::new(method, RpcClientConfig::default()),
            routes: Arc::clone(&self.routes),
        })
    }
}

struct Cluster {
    registry: Arc<MemoryRegistry>,
    loopback: Loopback,
    shutdown: Arc<ShutdownController>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            loopback: Loopback::default(),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Serves `router` and registers it under `advertised` (`host:port`).
    async fn serve(&self, service: &str, advertised: &str, router: MethodRouter) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap().to_string();
        tokio::spawn(RpcServer::new(router, Arc::clone(&self.shutdown)).serve(listener));
        self.register(service, advertised, local).await;
    }

    async fn register(&self, service: &str, advertised: &str, target: String) {
        let (host, port) = advertised.rsplit_once(':').unwrap();
        self.registry
            .register(&Registration::new(service, host, port.parse().unwrap()))
            .await
            .unwrap();
        self.loopback.routes.insert(advertised.to_string(), target);
    }

    async fn gateway(&self) -> (Arc<Gateway<Loopback>>, Router) {
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&self.registry) as Arc<dyn RegistryClient>,
            DiscoveryConfig::default(),
            DispatchConfig::default(),
            self.loopback.clone(),
        ));
        let router = transport::router(&gateway.apis());
        gateway.settled().await;
        (gateway, router)
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn product_router() -> MethodRouter {
    let apis = Apis {
        product: local_apis().product,
        ..Apis::default()
    };
    apis.method_router()
}

#[tokio::test]
async fn get_products_through_the_gateway() {
    let cluster = Cluster::new();
    cluster
        .serve(service_names::PRODUCT, "10.0.0.1:9000", product_router())
        .await;
    let (gateway, router) = cluster.gateway().await;

    let (status, body) = send(&router, get("/api/v1/products/?a=2&b=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "v": 5, "err": null }));

    let counts = gateway.instance_counts();
    assert_eq!(counts[service_names::PRODUCT], 1);
    assert_eq!(counts[service_names::USER], 0);
}

#[tokio::test]
async fn business_errors_are_not_retried() {
    let cluster = Cluster::new();
    let mut ops = Vec::new();
    for advertised in ["10.0.0.1:9000", "10.0.0.2:9000"] {
        let op = counted(|_ctx, req: GetProductsRequest| async move {
            if req.a == 0 && req.b == 0 {
                return Ok::<_, CallError>(Reply::<GetProductsResponse>::fail(
                    BusinessError::TwoZeroes,
                ));
            }
            Ok(Reply::ok(GetProductsResponse { v: req.a + req.b }))
        });
        let mut router = MethodRouter::new();
        router.add(method_names::GET_PRODUCTS, Arc::clone(&op) as BoxOperation<_, _>);
        cluster.serve(service_names::PRODUCT, advertised, router).await;
        ops.push(op);
    }
    let (_gateway, router) = cluster.gateway().await;

    let (status, body) = send(&router, get("/api/v1/products/?a=0&b=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "can't sum two zeroes" }));

    let attempts: u32 = ops.iter().map(|op| op.calls.load(Ordering::SeqCst)).sum();
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn dead_instances_are_skipped() {
    let cluster = Cluster::new();
    cluster
        .serve(service_names::PRODUCT, "10.0.0.1:9000", product_router())
        .await;

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = closed.local_addr().unwrap().to_string();
    drop(closed);
    cluster
        .register(service_names::PRODUCT, "10.0.0.2:9000", dead)
        .await;

    let (gateway, router) = cluster.gateway().await;
    assert_eq!(gateway.instance_counts()[service_names::PRODUCT], 2);

    for a in 1..=4 {
        let (status, body) = send(&router, get(&format!("/api/v1/products/?a={a}&b=1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["v"], a + 1);
    }
}

#[tokio::test]
async fn services_without_instances_are_unavailable() {
    let cluster = Cluster::new();
    let (_gateway, router) = cluster.gateway().await;

    let (status, body) = send(&router, get("/api/v1/users/u-1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "error": "service unavailable" }));
}

#[tokio::test]
async fn malformed_requests_fail_at_the_gateway() {
    let cluster = Cluster::new();
    cluster
        .serve(service_names::PRODUCT, "10.0.0.1:9000", product_router())
        .await;
    let (_gateway, router) = cluster.gateway().await;

    let (status, body) = send(&router, get("/api/v1/products/?a=x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "malformed request" }));
}

fn order_router(stores: &Stores) -> MethodRouter {
    let service = Arc::new(OrderService::new(stores, IdGenerator::new(3)));
    let apis = Apis {
        order: Some(OrderApi::local(&service, &ChainConfig::default())),
        ..Apis::default()
    };
    apis.method_router()
}

#[tokio::test]
async fn create_order_is_an_upsert() {
    let cluster = Cluster::new();
    let stores = open(&StorageConfig::default()).unwrap();
    cluster
        .serve(service_names::ORDER, "10.0.0.3:9000", order_router(&stores))
        .await;
    let (_gateway, router) = cluster.gateway().await;

    for amount in [10.0, 12.5] {
        let order = json!({ "invoice": { "invoiceId": 42, "userId": "u-1", "amount": amount } });
        let request = Request::post("/api/v1/orders/")
            .header("content-type", "application/json")
            .body(Body::from(order.to_string()))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "42");
    }

    assert_eq!(stores.orders.len(), 1);
    let stored = stores.orders.get("42").unwrap().unwrap();
    assert!((stored.amount - 12.5).abs() < f64::EPSILON);

    let (status, body) = send(&router, get("/api/v1/orders/42/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["userId"], "u-1");
}
