//! Retrying dispatcher over a balancer.
//!
//! One logical call makes at most `max_attempts` selections, all under one
//! wall-clock budget. Every attempt selects afresh, so a retry lands on
//! another instance when one is available.

use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::Reply;
use tokio::time::Instant;
use tracing::warn;

use super::breaker::CircuitBreaker;
use super::config::RetryConfig;
use crate::discovery::Balancer;
use crate::service::operation::{CallContext, CallError, Operation};

/// `Retry(Balancer)`, optionally guarded per attempt by a shared breaker.
pub struct Retry<Req, Resp> {
    balancer: Arc<dyn Balancer<Req, Resp>>,
    breaker: Option<Arc<CircuitBreaker>>,
    config: RetryConfig,
}

impl<Req, Resp> Retry<Req, Resp> {
    #[must_use]
    pub fn new(balancer: Arc<dyn Balancer<Req, Resp>>, config: RetryConfig) -> Self {
        Self {
            balancer,
            breaker: None,
            config: RetryConfig {
                max_attempts: config.max_attempts.max(1),
                total_timeout: config.total_timeout,
            },
        }
    }

    /// Runs every attempt through `breaker`.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn config(&self) -> RetryConfig {
        self.config
    }
}

impl<Req, Resp> std::fmt::Debug for Retry<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("config", &self.config)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<Req, Resp> Operation<Req, Resp> for Retry<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, ctx: CallContext, req: Req) -> Result<Reply<Resp>, CallError> {
        let started = Instant::now();
        let ctx = ctx.with_deadline(started + self.config.total_timeout);
        let deadline = ctx.deadline.unwrap_or(started + self.config.total_timeout);
        let operation = ctx.operation;

        let mut attempts = 0_u32;
        let mut last = CallError::NoEndpoints;
        let outcome = loop {
            if attempts >= self.config.max_attempts {
                break Err(last);
            }
            if ctx.cancel.is_cancelled() {
                break Err(CallError::Cancelled);
            }
            attempts += 1;
            metrics::counter!("storefront_dispatch_attempts_total", "operation" => operation)
                .increment(1);

            let endpoint = match self.balancer.next() {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    last = err;
                    if Instant::now() >= deadline {
                        break Err(last);
                    }
                    continue;
                }
            };

            let permit = match self.breaker.as_ref().map(CircuitBreaker::try_acquire) {
                None => None,
                Some(Ok(permit)) => Some(permit),
                Some(Err(open)) => break Err(open),
            };

            let attempt = tokio::time::timeout_at(deadline, endpoint.call(ctx.clone(), req.clone()));
            let result = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    // The permit drops unsettled: the attempt is abandoned, not failed.
                    break Err(CallError::Cancelled);
                }
                result = attempt => result.unwrap_or_else(|_| Err(CallError::timeout_after(started))),
            };

            if let Some(permit) = permit {
                permit.record(result.is_ok());
            }

            match result {
                Ok(reply) => break Ok(reply),
                Err(err) if !err.is_retryable() => break Err(err),
                Err(err) => {
                    last = err;
                    if Instant::now() >= deadline {
                        break Err(last);
                    }
                }
            }
        };

        if let Err(err) = &outcome {
            warn!(
                operation,
                attempts,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "dispatch failed"
            );
        }
        outcome
    }
}
