//! Typed operations over an [`RpcClient`], and the factory the gateway's
//! endpointers use to bind them to discovered instances.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_core::rpc::{decode_body, encode_body};
use storefront_core::{BusinessError, Reply};

use super::client::{RpcClient, RpcClientConfig};
use crate::discovery::{EndpointFactory, Instance, Release};
use crate::service::operation::{BoxOperation, CallContext, CallError, Operation};

/// Calls one method on one instance.
pub struct RpcEndpoint<Req, Resp> {
    client: Arc<RpcClient>,
    method: &'static str,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> RpcEndpoint<Req, Resp> {
    #[must_use]
    pub fn new(client: Arc<RpcClient>, method: &'static str) -> Self {
        Self {
            client,
            method,
            _types: PhantomData,
        }
    }
}

/// Remaining budget for the request frame: 0 when unbounded, else at least 1.
fn timeout_ms(ctx: &CallContext) -> u64 {
    ctx.remaining().map_or(0, |left| {
        u64::try_from(left.as_millis()).unwrap_or(u64::MAX).max(1)
    })
}

#[async_trait]
impl<Req, Resp> Operation<Req, Resp> for RpcEndpoint<Req, Resp>
where
    Req: Serialize + Send + Sync + 'static,
    Resp: DeserializeOwned + Send + Sync + 'static,
{
    async fn call(&self, ctx: CallContext, req: Req) -> Result<Reply<Resp>, CallError> {
        let body = encode_body(&req).map_err(|e| CallError::Internal(e.to_string()))?;

        let reply = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(CallError::Cancelled),
            reply = self.client.call(self.method, timeout_ms(&ctx), body) => reply?,
        };

        if !reply.err.is_empty() {
            return Ok(Reply::fail(BusinessError::from_message(&reply.err)));
        }
        let resp = decode_body(&reply.body).map_err(|e| {
            CallError::Transport(format!(
                "undecodable {} reply from {}: {e}",
                self.method,
                self.client.addr()
            ))
        })?;
        Ok(Reply::ok(resp))
    }
}

/// Builds an [`RpcEndpoint`] for `method` on each instance it is given.
///
/// Every endpoint owns its own client; releasing the endpoint closes it.
pub struct RpcEndpointFactory<Req, Resp> {
    method: &'static str,
    config: RpcClientConfig,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> RpcEndpointFactory<Req, Resp> {
    #[must_use]
    pub fn new(method: &'static str, config: RpcClientConfig) -> Self {
        Self {
            method,
            config,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<Req, Resp> EndpointFactory<Req, Resp> for RpcEndpointFactory<Req, Resp>
where
    Req: Serialize + Send + Sync + 'static,
    Resp: DeserializeOwned + Send + Sync + 'static,
{
    async fn build(
        &self,
        instance: &Instance,
    ) -> anyhow::Result<(BoxOperation<Req, Resp>, Release)> {
        let client = Arc::new(RpcClient::new(instance.address.clone(), self.config));
        let endpoint: BoxOperation<Req, Resp> =
            Arc::new(RpcEndpoint::new(Arc::clone(&client), self.method));
        let release: Release = Box::new(move || client.close());
        Ok((endpoint, release))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use storefront_core::method_names;
    use storefront_core::model::{GetProductsRequest, GetProductsResponse};
    use tokio::net::TcpListener;

    use super::*;
    use crate::network::ShutdownController;
    use crate::service::router::MethodRouter;
    use crate::testing::counted;
    use crate::transport::rpc::RpcServer;

    async fn start() -> String {
        let mut router = MethodRouter::new();
        router.add(
            method_names::GET_PRODUCTS,
            counted(|ctx: CallContext, req: GetProductsRequest| async move {
                if req.a == 0 && req.b == 0 {
                    return Ok(Reply::<GetProductsResponse>::fail(BusinessError::TwoZeroes));
                }
                if req.a < 0 {
                    // Reports the budget the server saw.
                    let left = ctx.remaining().map_or(0, |d| d.as_millis());
                    return Ok(Reply::ok(GetProductsResponse {
                        v: i64::try_from(left).unwrap(),
                    }));
                }
                Ok(Reply::ok(GetProductsResponse { v: req.a + req.b }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = RpcServer::new(router, Arc::new(ShutdownController::new()));
        tokio::spawn(server.serve(listener));
        addr
    }

    async fn endpoint(addr: String) -> BoxOperation<GetProductsRequest, GetProductsResponse> {
        let factory = RpcEndpointFactory::new(method_names::GET_PRODUCTS, RpcClientConfig::default());
        let (endpoint, _release) = factory.build(&Instance::new("p-1", addr)).await.unwrap();
        endpoint
    }

    #[tokio::test]
    async fn success_and_business_errors() {
        let endpoint = endpoint(start().await).await;
        let ctx = || CallContext::new(method_names::GET_PRODUCTS);

        let reply = endpoint.call(ctx(), GetProductsRequest { a: 2, b: 3 }).await.unwrap();
        assert_eq!(reply.value(), Some(&GetProductsResponse { v: 5 }));

        let reply = endpoint.call(ctx(), GetProductsRequest { a: 0, b: 0 }).await.unwrap();
        assert_eq!(reply.error(), Some(&BusinessError::TwoZeroes));
    }

    #[tokio::test]
    async fn deadline_travels_with_the_request() {
        let endpoint = endpoint(start().await).await;

        let ctx = CallContext::new(method_names::GET_PRODUCTS).with_timeout(Duration::from_secs(5));
        let reply = endpoint.call(ctx, GetProductsRequest { a: -1, b: 0 }).await.unwrap();
        let seen = reply.value().unwrap().v;
        assert!(seen > 4000 && seen <= 5000, "server saw {seen}ms");

        let unbounded = CallContext::new(method_names::GET_PRODUCTS);
        let reply = endpoint.call(unbounded, GetProductsRequest { a: -1, b: 0 }).await.unwrap();
        assert_eq!(reply.value().unwrap().v, 0);
    }

    #[tokio::test]
    async fn cancelled_context_abandons_the_call() {
        let endpoint = endpoint(start().await).await;
        let ctx = CallContext::new(method_names::GET_PRODUCTS);
        ctx.cancel.cancel();

        let err = endpoint.call(ctx, GetProductsRequest { a: 1, b: 1 }).await.unwrap_err();
        assert_eq!(err, CallError::Cancelled);
    }

    #[tokio::test]
    async fn release_closes_the_client() {
        let addr = start().await;
        let factory = RpcEndpointFactory::new(method_names::GET_PRODUCTS, RpcClientConfig::default());
        let (endpoint, release): (BoxOperation<GetProductsRequest, GetProductsResponse>, _) =
            factory.build(&Instance::new("p-1", addr)).await.unwrap();
        release();

        let err = endpoint
            .call(
                CallContext::new(method_names::GET_PRODUCTS),
                GetProductsRequest { a: 1, b: 1 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[test]
    fn remaining_budget_is_never_zero_when_bounded() {
        let ctx = CallContext {
            deadline: Some(tokio::time::Instant::now()),
            ..CallContext::new("x")
        };
        assert_eq!(timeout_ms(&ctx), 1);
        assert_eq!(timeout_ms(&CallContext::new("x")), 0);
    }
}
