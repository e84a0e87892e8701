//! Method routing: dispatches encoded RPC requests to operations by method name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_core::rpc::{decode_body, encode_body};

use super::operation::{BoxOperation, CallContext, CallError};

// ---------------------------------------------------------------------------
// EncodedReply
// ---------------------------------------------------------------------------

/// A reply ready for an RPC `Reply` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedReply {
    /// `MsgPack` response body; empty when `err` is set.
    pub body: Vec<u8>,
    /// Business error message; empty on success.
    pub err: String,
}

// ---------------------------------------------------------------------------
// MethodHandler
// ---------------------------------------------------------------------------

/// Decode, call, encode for one method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: CallContext, body: &[u8]) -> Result<EncodedReply, CallError>;
}

struct TypedHandler<Req, Resp> {
    operation: BoxOperation<Req, Resp>,
}

#[async_trait]
impl<Req, Resp> MethodHandler for TypedHandler<Req, Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    async fn handle(&self, ctx: CallContext, body: &[u8]) -> Result<EncodedReply, CallError> {
        let req: Req = decode_body(body).map_err(|e| CallError::Decode(e.to_string()))?;
        let reply = self.operation.call(ctx, req).await?;
        match reply.into_result() {
            Ok(resp) => Ok(EncodedReply {
                body: encode_body(&resp).map_err(|e| CallError::Internal(e.to_string()))?,
                err: String::new(),
            }),
            Err(err) => Ok(EncodedReply {
                body: Vec::new(),
                err: err.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes RPC requests to the operation registered for their method name.
///
/// Requests for an unregistered method fail with `CallError::UnknownMethod`;
/// bodies that do not decode as the method's request type fail with
/// `CallError::Decode` before the operation runs.
#[derive(Clone, Default)]
pub struct MethodRouter {
    methods: HashMap<&'static str, Arc<dyn MethodHandler>>,
}

impl MethodRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `operation` under `method`, replacing any earlier registration.
    pub fn add<Req, Resp>(&mut self, method: &'static str, operation: BoxOperation<Req, Resp>)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        self.methods
            .insert(method, Arc::new(TypedHandler { operation }));
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Looks up the handler for `method` along with its static name.
    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<(&'static str, Arc<dyn MethodHandler>)> {
        self.methods
            .get_key_value(method)
            .map(|(name, handler)| (*name, Arc::clone(handler)))
    }

    /// Decodes `body`, runs the operation and encodes its reply.
    ///
    /// # Errors
    ///
    /// Returns `CallError::UnknownMethod` for unregistered methods, and
    /// whatever the decode or the operation fails with otherwise.
    pub async fn dispatch(
        &self,
        method: &str,
        ctx: impl FnOnce(&'static str) -> CallContext,
        body: &[u8],
    ) -> Result<EncodedReply, CallError> {
        let Some((name, handler)) = self.resolve(method) else {
            return Err(CallError::UnknownMethod {
                name: method.to_string(),
            });
        };
        handler.handle(ctx(name), body).await
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("methods", &self.methods())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
