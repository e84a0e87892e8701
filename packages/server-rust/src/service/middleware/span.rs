//! Tracing span middleware.

use std::task::{Context, Poll};

use storefront_core::Reply;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::{Call, ChainFuture};
use crate::service::operation::CallError;

// ---------------------------------------------------------------------------
// SpanLayer
// ---------------------------------------------------------------------------

/// Runs each call inside an `operation` span named after its method.
#[derive(Debug, Clone)]
pub struct SpanLayer;

impl<S> Layer<S> for SpanLayer {
    type Service = SpanService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SpanService { inner }
    }
}

// ---------------------------------------------------------------------------
// SpanService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpanService<S> {
    inner: S,
}

impl<S, Req, T> Service<Call<Req>> for SpanService<S>
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
        let span = info_span!(
            "operation",
            method = call.ctx.operation,
            request_id = call.ctx.request_id.as_deref().unwrap_or(""),
        );
        let fut = {
            let _entered = span.enter();
            self.inner.call(call)
        };
        Box::pin(fut.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::CallContext;

    #[tokio::test]
    async fn passes_through_response() {
        let svc = SpanLayer.layer(tower::service_fn(|call: Call<()>| async move {
            Ok::<_, CallError>(Reply::ok(call.ctx.operation))
        }));
        let reply = svc
            .oneshot(Call::new(CallContext::new("usersvc.Login"), ()))
            .await
            .unwrap();
        assert_eq!(reply.value(), Some(&"usersvc.Login"));
    }
}
