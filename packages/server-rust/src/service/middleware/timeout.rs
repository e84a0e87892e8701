//! Deadline middleware for operations.
//!
//! Rejects calls that outlive `ctx.deadline` with `CallError::Timeout`. The
//! deadline is set by the caller (gateway budget or RPC `timeout_ms`), so
//! different calls of the same operation may have different bounds.

use std::task::{Context, Poll};

use storefront_core::Reply;
use tokio::time::Instant;
use tower::{Layer, Service};

use super::{Call, ChainFuture};
use crate::service::operation::CallError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S, Req, T> Service<Call<Req>> for TimeoutService<S>
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
        let deadline = call.ctx.deadline;
        let fut = self.inner.call(call);
        Box::pin(async move {
            let Some(deadline) = deadline else {
                return fut.await;
            };
            let started = Instant::now();
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(CallError::timeout_after(started)),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::CallContext;

    async fn slow(call: Call<u64>) -> Result<Reply<u64>, CallError> {
        tokio::time::sleep(Duration::from_millis(call.req)).await;
        Ok(Reply::ok(call.req))
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let svc = TimeoutLayer.layer(tower::service_fn(slow));
        let ctx = CallContext::new("productsvc.Upload").with_timeout(Duration::from_millis(100));
        let reply = svc.oneshot(Call::new(ctx, 10)).await.unwrap();
        assert_eq!(reply.value(), Some(&10));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_times_out() {
        let svc = TimeoutLayer.layer(tower::service_fn(slow));
        let ctx = CallContext::new("productsvc.Upload").with_timeout(Duration::from_millis(50));
        let err = svc.oneshot(Call::new(ctx, 1_000)).await.unwrap_err();
        assert!(matches!(err, CallError::Timeout { elapsed_ms } if elapsed_ms >= 50));
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_means_no_bound() {
        let svc = TimeoutLayer.layer(tower::service_fn(slow));
        let reply = svc
            .oneshot(Call::new(CallContext::new("productsvc.Upload"), 5_000))
            .await
            .unwrap();
        assert!(reply.is_ok());
    }
}
