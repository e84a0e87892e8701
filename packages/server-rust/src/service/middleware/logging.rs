//! Structured completion logging.
//!
//! Emits one `operation complete` event per call with the method, the key
//! request fields, the resulting error (if any) and the duration.

use std::task::{Context, Poll};

use storefront_core::Reply;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info, warn};

use super::{Call, ChainFuture, LogFields};
use crate::service::operation::CallError;

#[derive(Debug, Clone)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S, Req, T> Service<Call<Req>> for LoggingService<S>
where
    S: Service<Call<Req>, Response = Reply<T>, Error = CallError> + Send,
    S::Future: Send + 'static,
    Req: LogFields,
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
        let fields = call.req.log_fields();
        let fut = self.inner.call(call);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(reply) => match reply.error() {
                    None => info!(method, fields = %fields, duration_ms, "operation complete"),
                    Some(err) => info!(
                        method,
                        fields = %fields,
                        duration_ms,
                        err = %err,
                        "operation complete"
                    ),
                },
                Err(err) => warn!(
                    method,
                    fields = %fields,
                    duration_ms,
                    error = %err,
                    "operation complete"
                ),
            }

            result
        })
    }
}
