//! Chain composition: wraps one operation handler in every middleware layer.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use storefront_core::Reply;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};

use super::{
    BreakerLayer, Call, LoadShedLayer, LogFields, LoggingLayer, MetricsLayer, SpanLayer,
    TimeoutLayer,
};
use crate::resilience::CircuitBreaker;
use crate::service::config::ChainConfig;
use crate::service::operation::{BoxOperation, CallContext, CallError, Operation};

/// A finished, type-erased operation chain.
pub type BoxChain<Req, T> = BoxCloneService<Call<Req>, Reply<T>, CallError>;

/// Wraps `handler` for `method`.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- latency and outcome counters
/// 2. `LoggingLayer` -- one completion event per call
/// 3. `SpanLayer` -- `operation` span
/// 4. `LoadShedLayer` -- reject when overloaded (optional)
/// 5. `BreakerLayer` -- fail fast while the operation keeps failing
/// 6. `TimeoutLayer` -- enforce the propagated deadline
///
/// Shed calls never reach the breaker, so a burst cannot open it.
#[must_use]
pub fn build_chain<Req, T, S>(method: &'static str, config: &ChainConfig, handler: S) -> BoxChain<Req, T>
where
    S: Service<Call<Req>, Response = Reply<T>, Error = CallError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: LogFields + Send + 'static,
    T: Send + 'static,
{
    let breaker = Arc::new(CircuitBreaker::new(method, config.breaker));
    let service = ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(LoggingLayer)
        .layer(SpanLayer)
        .option_layer(config.max_concurrent_calls.map(LoadShedLayer::new))
        .layer(BreakerLayer::new(breaker))
        .layer(TimeoutLayer)
        .service(handler);
    BoxCloneService::new(service)
}

/// Exposes a chain through the uniform [`Operation`] contract.
pub struct ServiceOperation<Req, T> {
    service: Mutex<BoxChain<Req, T>>,
}

impl<Req, T> ServiceOperation<Req, T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    #[must_use]
    pub fn new(service: BoxChain<Req, T>) -> Self {
        Self {
            service: Mutex::new(service),
        }
    }

    /// Builds the chain for `handler` and erases it into a [`BoxOperation`].
    #[must_use]
    pub fn boxed<S>(method: &'static str, config: &ChainConfig, handler: S) -> BoxOperation<Req, T>
    where
        S: Service<Call<Req>, Response = Reply<T>, Error = CallError> + Clone + Send + 'static,
        S::Future: Send + 'static,
        Req: LogFields,
    {
        Arc::new(Self::new(build_chain(method, config, handler)))
    }
}

#[async_trait]
impl<Req, T> Operation<Req, T> for ServiceOperation<Req, T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    async fn call(&self, ctx: CallContext, req: Req) -> Result<Reply<T>, CallError> {
        let service = self.service.lock().clone();
        let cancel = ctx.cancel.clone();
        tokio::select! {
            () = cancel.cancelled() => Err(CallError::Cancelled),
            result = service.oneshot(Call::new(ctx, req)) => result,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
