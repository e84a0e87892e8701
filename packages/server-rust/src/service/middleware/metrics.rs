//! Metrics middleware for operations.
//!
//! Records `storefront_operation_duration_seconds` and
//! `storefront_operations_total`, both labelled by method and outcome.

use std::task::{Context, Poll};

use storefront_core::Reply;
use tokio::time::Instant;
use tower::{Layer, Service};

use super::{outcome, Call, ChainFuture};
use crate::service::operation::CallError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that times and counts every call.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, Req, T> Service<Call<Req>> for MetricsService<S>
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
        let method = call.ctx.operation;
        let fut = self.inner.call(call);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let outcome = outcome(&result);

            metrics::histogram!(
                "storefront_operation_duration_seconds",
                "method" => method,
                "outcome" => outcome
            )
            .record(start.elapsed().as_secs_f64());
            metrics::counter!(
                "storefront_operations_total",
                "method" => method,
                "outcome" => outcome
            )
            .increment(1);

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
