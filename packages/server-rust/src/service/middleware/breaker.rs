//! Circuit-breaker middleware.
//!
//! Business errors inside a [`Reply`] are successes here: only calls that
//! produced no reply count toward opening the breaker.

use std::sync::Arc;
use std::task::{Context, Poll};

use storefront_core::Reply;
use tower::{Layer, Service};

use super::{Call, ChainFuture};
use crate::resilience::CircuitBreaker;
use crate::service::operation::CallError;

#[derive(Debug, Clone)]
pub struct BreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for BreakerLayer {
    type Service = BreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S, Req, T> Service<Call<Req>> for BreakerService<S>
where
    S: Service<Call<Req>, Response = Reply<T>, Error = CallError> + Send,
    S::Future: Send + 'static,
    T: Send + 'static,
{
    type Response = Reply<T>;
    type Error = CallError;
    type Future = ChainFuture<T>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => return Box::pin(async move { Err(open) }),
        };
        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            permit.record(result.is_ok());
            result
        })
    }
}
