//! Tower middleware layers wrapping every domain operation.
//!
//! - [`metrics`]: latency histogram and outcome counter
//! - [`logging`]: one structured completion event per call
//! - [`span`]: `operation` tracing span
//! - [`breaker`]: per-operation circuit breaker
//! - [`timeout`]: enforces the call's propagated deadline
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`chain`]: composes the layers around one handler

pub mod breaker;
pub mod chain;
pub mod load_shed;
pub mod logging;
pub mod metrics;
pub mod span;
pub mod timeout;

use std::future::Future;
use std::pin::Pin;

use storefront_core::Reply;

use crate::service::operation::{CallContext, CallError};

pub use breaker::BreakerLayer;
pub use chain::{build_chain, BoxChain, ServiceOperation};
pub use load_shed::LoadShedLayer;
pub use logging::LoggingLayer;
pub use metrics::MetricsLayer;
pub use span::SpanLayer;
pub use timeout::TimeoutLayer;

/// One request travelling through an operation chain.
#[derive(Debug, Clone)]
pub struct Call<Req> {
    pub ctx: CallContext,
    pub req: Req,
}

impl<Req> Call<Req> {
    #[must_use]
    pub fn new(ctx: CallContext, req: Req) -> Self {
        Self { ctx, req }
    }
}

/// Future returned by every chain layer.
pub type ChainFuture<T> = Pin<Box<dyn Future<Output = Result<Reply<T>, CallError>> + Send>>;

/// Key request fields for the completion log line.
pub trait LogFields {
    fn log_fields(&self) -> String {
        String::new()
    }
}

/// Outcome label shared by logging and metrics.
#[must_use]
pub fn outcome<T>(result: &Result<Reply<T>, CallError>) -> &'static str {
    match result {
        Ok(reply) if reply.is_ok() => "ok",
        Ok(_) => "business_error",
        Err(_) => "error",
    }
}
