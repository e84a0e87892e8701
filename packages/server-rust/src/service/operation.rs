//! The uniform operation contract and the call-level error taxonomy.
//!
//! Everything that can answer a request implements [`Operation`]: a local
//! middleware chain, a remote endpoint bound to one instance, and a retrying
//! dispatcher over many endpoints. Business errors travel inside the
//! [`Reply`]; [`CallError`] is reserved for calls that did not produce one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storefront_core::{FaultCode, Reply};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Per-call metadata carried from the inbound request to every attempt.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Method name of the operation being called.
    pub operation: &'static str,
    /// Absolute deadline; `None` leaves the bound to the layers below.
    pub deadline: Option<Instant>,
    /// Fires when the caller gives up. Cancellation aborts all remaining work.
    pub cancel: CancellationToken,
    /// Inbound request id, when the call originated from HTTP.
    pub request_id: Option<String>,
}

impl CallContext {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            deadline: None,
            cancel: CancellationToken::new(),
            request_id: None,
        }
    }

    /// Tightens the deadline to `now + timeout`. An earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Tightens the deadline. An earlier deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Time left before the deadline; `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// Reasons a call produced no [`Reply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("no endpoints available")]
    NoEndpoints,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed request: {0}")]
    Decode(String),
    #[error("call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("call cancelled")]
    Cancelled,
    #[error("unknown method: {name}")]
    UnknownMethod { name: String },
    /// The remote side refused or failed the call without a reply.
    #[error("remote failure: {0}")]
    Remote(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Whether another attempt, possibly on another instance, may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoEndpoints
                | Self::Overloaded
                | Self::Transport(_)
                | Self::Timeout { .. }
                | Self::Remote(_)
        )
    }

    /// Builds a timeout error from the time spent so far.
    #[must_use]
    pub fn timeout_after(started: Instant) -> Self {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Self::Timeout { elapsed_ms }
    }

    /// Fault code reported to RPC clients for this error.
    #[must_use]
    pub fn fault_code(&self) -> FaultCode {
        match self {
            Self::Decode(_) => FaultCode::Decode,
            Self::UnknownMethod { .. } => FaultCode::UnknownMethod,
            Self::NoEndpoints | Self::CircuitOpen | Self::Overloaded | Self::Cancelled => {
                FaultCode::Unavailable
            }
            Self::Timeout { .. } => FaultCode::Timeout,
            Self::Transport(_) | Self::Remote(_) | Self::Internal(_) => FaultCode::Internal,
        }
    }

    /// Code and message for the fault frame answering this error.
    ///
    /// [`CallError::from_fault`] restores `Decode` and `UnknownMethod` exactly.
    #[must_use]
    pub fn into_fault(self) -> (FaultCode, String) {
        let code = self.fault_code();
        let message = match self {
            Self::Decode(message) => message,
            Self::UnknownMethod { name } => name,
            other => other.to_string(),
        };
        (code, message)
    }

    /// Rebuilds a local error from a fault frame sent by a server.
    #[must_use]
    pub fn from_fault(code: FaultCode, message: String) -> Self {
        match code {
            FaultCode::Decode => Self::Decode(message),
            FaultCode::UnknownMethod => Self::UnknownMethod { name: message },
            FaultCode::Unavailable | FaultCode::Timeout | FaultCode::Internal => {
                Self::Remote(message)
            }
        }
    }
}

impl From<anyhow::Error> for CallError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// `operation(context, request) -> (response, error)`.
#[async_trait]
pub trait Operation<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, ctx: CallContext, req: Req) -> Result<Reply<Resp>, CallError>;
}

/// Shared, type-erased operation.
pub type BoxOperation<Req, Resp> = Arc<dyn Operation<Req, Resp>>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn with_deadline_keeps_the_earlier_bound() {
        let early = Instant::now() + Duration::from_millis(100);
        let late = Instant::now() + Duration::from_secs(5);

        let ctx = CallContext::new("test.Op").with_deadline(early).with_deadline(late);
        assert_eq!(ctx.deadline, Some(early));

        let ctx = CallContext::new("test.Op").with_deadline(late).with_deadline(early);
        assert_eq!(ctx.deadline, Some(early));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_saturates_at_zero() {
        let ctx = CallContext::new("test.Op").with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert_eq!(CallContext::new("test.Op").remaining(), None);
    }

    #[test]
    fn retryable_classification() {
        assert!(CallError::NoEndpoints.is_retryable());
        assert!(CallError::Transport("reset".into()).is_retryable());
        assert!(CallError::Timeout { elapsed_ms: 1 }.is_retryable());
        assert!(!CallError::CircuitOpen.is_retryable());
        assert!(!CallError::Decode("bad".into()).is_retryable());
        assert!(!CallError::Cancelled.is_retryable());
    }

    #[test]
    fn faults_map_back_to_call_errors() {
        let decode = CallError::Decode("bad body".into());
        assert_eq!(
            CallError::from_fault(decode.fault_code(), "bad body".into()),
            decode
        );
        assert_eq!(
            CallError::from_fault(CallError::CircuitOpen.fault_code(), "open".into()),
            CallError::Remote("open".into())
        );
    }

    #[test]
    fn fault_round_trip_keeps_non_retryable_errors() {
        for err in [
            CallError::Decode("missing field `a`".into()),
            CallError::UnknownMethod {
                name: "productsvc.Nope".into(),
            },
        ] {
            let (code, message) = err.clone().into_fault();
            assert_eq!(CallError::from_fault(code, message), err);
        }
        let (code, message) = CallError::Overloaded.into_fault();
        assert_eq!(code, FaultCode::Unavailable);
        assert_eq!(message, "server overloaded, try again later");
    }

    #[test]
    fn anyhow_errors_become_internal() {
        let err: CallError = anyhow::anyhow!("store offline").into();
        assert_eq!(err, CallError::Internal("store offline".into()));
    }
}
