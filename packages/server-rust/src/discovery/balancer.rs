//! Per-call endpoint selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::endpointer::EndpointSource;
use crate::service::operation::{BoxOperation, CallError};

/// Picks one callable operation for the next call.
pub trait Balancer<Req, Resp>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CallError::NoEndpoints`] when the live set is empty.
    fn next(&self) -> Result<BoxOperation<Req, Resp>, CallError>;
}

/// Cycles through the live set in its address order.
///
/// Each call reads a fresh snapshot, so membership changes apply to the next
/// selection without rebuilding the balancer.
pub struct RoundRobin<Req, Resp> {
    source: Arc<dyn EndpointSource<Req, Resp>>,
    counter: AtomicUsize,
}

impl<Req, Resp> RoundRobin<Req, Resp> {
    #[must_use]
    pub fn new(source: Arc<dyn EndpointSource<Req, Resp>>) -> Self {
        Self {
            source,
            counter: AtomicUsize::new(0),
        }
    }
}

impl<Req, Resp> Balancer<Req, Resp> for RoundRobin<Req, Resp> {
    fn next(&self) -> Result<BoxOperation<Req, Resp>, CallError> {
        let endpoints = self.source.endpoints();
        if endpoints.is_empty() {
            return Err(CallError::NoEndpoints);
        }
        let slot = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Ok(Arc::clone(&endpoints[slot].operation))
    }
}
