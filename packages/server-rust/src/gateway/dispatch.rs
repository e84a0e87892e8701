//! Per-operation dispatcher assembly.
//!
//! `Retry(RoundRobin(Endpointer))`, with one breaker per operation shared by
//! all of its attempts.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::discovery::{
    Balancer, EndpointFactory, EndpointSource, Endpointer, InstanceReceiver, RoundRobin,
};
use crate::resilience::{CircuitBreaker, DispatchConfig, Retry};
use crate::service::operation::BoxOperation;
use crate::transport::rpc::{RpcClientConfig, RpcEndpointFactory};

/// Hands out the endpoint factory for one method.
pub trait FactorySource: Send + Sync + 'static {
    fn factory<Req, Resp>(&self, method: &'static str) -> Arc<dyn EndpointFactory<Req, Resp>>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static;
}

/// Every endpoint is an RPC client dialing the instance address.
impl FactorySource for RpcClientConfig {
    fn factory<Req, Resp>(&self, method: &'static str) -> Arc<dyn EndpointFactory<Req, Resp>>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new(RpcEndpointFactory::new(method, *self))
    }
}

/// A built dispatcher and the endpointer feeding it.
pub struct Dispatcher<Req, Resp> {
    pub operation: BoxOperation<Req, Resp>,
    pub endpointer: Arc<Endpointer<Req, Resp>>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Builds the dispatcher answering `method` from the instances on `sets`.
pub fn dispatcher<Req, Resp>(
    method: &'static str,
    sets: InstanceReceiver,
    factory: Arc<dyn EndpointFactory<Req, Resp>>,
    config: &DispatchConfig,
) -> Dispatcher<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    let endpointer = Arc::new(Endpointer::spawn(method, sets, factory));
    let source: Arc<dyn EndpointSource<Req, Resp>> = Arc::clone(&endpointer) as _;
    let balancer: Arc<dyn Balancer<Req, Resp>> = Arc::new(RoundRobin::new(source));
    let breaker = Arc::new(CircuitBreaker::new(method, config.breaker));
    let retry = Retry::new(balancer, config.retry).with_breaker(Arc::clone(&breaker));

    Dispatcher {
        operation: Arc::new(retry),
        endpointer,
        breaker,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use storefront_core::Reply;
    use tokio::sync::watch;

    use super::*;
    use crate::discovery::{Instance, InstanceSet, Release};
    use crate::resilience::{BreakerConfig, BreakerState, RetryConfig};
    use crate::service::operation::{CallContext, CallError};
    use crate::testing::{failing, replying};

    /// Instances at `bad:*` always fail; the rest answer their own port.
    struct ByAddress;

    #[async_trait]
    impl EndpointFactory<u32, String> for ByAddress {
        async fn build(
            &self,
            instance: &Instance,
        ) -> anyhow::Result<(BoxOperation<u32, String>, Release)> {
            let operation = if instance.address.starts_with("bad:") {
                failing(CallError::Transport("connection refused".into()))
            } else {
                replying(instance.address.clone())
            };
            Ok((operation, Box::new(|| {})))
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            retry: RetryConfig {
                max_attempts: 3,
                total_timeout: Duration::from_millis(500),
            },
            breaker: BreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
            },
        }
    }

    fn sets(addresses: &[&str]) -> (watch::Sender<Option<InstanceSet>>, InstanceReceiver) {
        let instances = addresses
            .iter()
            .map(|address| Instance::new(*address, *address))
            .collect();
        watch::channel(Some(Arc::new(instances)))
    }

    #[tokio::test]
    async fn retries_land_on_healthy_instances() {
        let (_tx, sets) = sets(&["bad:1", "good:2"]);
        let built = dispatcher("svc.Op", sets, Arc::new(ByAddress), &config());
        built.endpointer.settled().await;
        assert_eq!(built.endpointer.len(), 2);

        for _ in 0..4 {
            let reply: Reply<String> = built.operation.call(CallContext::new("svc.Op"), 1).await.unwrap();
            assert_eq!(reply.value().map(String::as_str), Some("good:2"));
        }
    }

    #[tokio::test]
    async fn dead_pool_opens_the_breaker() {
        let (_tx, sets) = sets(&["bad:1"]);
        let built = dispatcher("svc.Op", sets, Arc::new(ByAddress), &config());
        built.endpointer.settled().await;

        let err = built.operation.call(CallContext::new("svc.Op"), 1).await.unwrap_err();
        assert_eq!(err, CallError::CircuitOpen);
        assert_eq!(built.breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn empty_pool_has_no_endpoints() {
        let (_tx, sets) = sets(&[]);
        let built = dispatcher("svc.Op", sets, Arc::new(ByAddress), &config());
        built.endpointer.settled().await;

        let err = built.operation.call(CallContext::new("svc.Op"), 1).await.unwrap_err();
        assert_eq!(err, CallError::NoEndpoints);
    }
}
