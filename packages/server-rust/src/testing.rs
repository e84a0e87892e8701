//! Test doubles shared across module tests.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storefront_core::{IdGenerator, Reply};

use crate::service::api::{Apis, OrderApi, ProductApi, UserApi};
use crate::service::config::{ChainConfig, DomainConfig};
use crate::service::domain::{OrderService, ProductService, UserService};
use crate::service::operation::{BoxOperation, CallContext, CallError, Operation};
use crate::storage::{open, StorageConfig};

/// Operation backed by a closure.
pub struct FnOperation<F, Fut> {
    f: F,
    pub calls: AtomicU32,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<Req, Resp, F, Fut> Operation<Req, Resp> for FnOperation<F, Fut>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply<Resp>, CallError>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, req: Req) -> Result<Reply<Resp>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(ctx, req).await
    }
}

/// Wraps a closure as a shared operation that counts its calls.
pub fn counted<Req, Resp, F, Fut>(f: F) -> Arc<FnOperation<F, Fut>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply<Resp>, CallError>> + Send + 'static,
{
    Arc::new(FnOperation {
        f,
        calls: AtomicU32::new(0),
        _fut: PhantomData,
    })
}

/// Always answers with `Reply::ok(value)`.
pub fn replying<Req, Resp>(value: Resp) -> BoxOperation<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    counted(move |_ctx, _req: Req| {
        let value = value.clone();
        async move { Ok::<_, CallError>(Reply::ok(value)) }
    })
}

/// Always fails with `err`.
pub fn failing<Req, Resp>(err: CallError) -> BoxOperation<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    counted(move |_ctx, _req: Req| {
        let err = err.clone();
        async move { Err::<Reply<Resp>, _>(err) }
    })
}

/// Sleeps for `delay` before answering with `value`.
pub fn sleeping<Req, Resp>(delay: Duration, value: Resp) -> BoxOperation<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    counted(move |_ctx, _req: Req| {
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, CallError>(Reply::ok(value))
        }
    })
}

/// Every operation set, served by local chains over fresh memory stores.
pub fn local_apis() -> Apis {
    let stores = open(&StorageConfig::default()).unwrap();
    let domain = DomainConfig::default();
    let chain = ChainConfig::default();
    Apis {
        product: Some(ProductApi::local(
            &Arc::new(ProductService::new(&stores, &domain)),
            &chain,
        )),
        user: Some(UserApi::local(
            &Arc::new(UserService::new(&stores, &domain)),
            &chain,
        )),
        order: Some(OrderApi::local(
            &Arc::new(OrderService::new(&stores, IdGenerator::new(1))),
            &chain,
        )),
    }
}
