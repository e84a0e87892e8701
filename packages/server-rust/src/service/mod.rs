//! Operation framework shared by the domain services and the gateway.
//!
//! 1. **Operation contract** (`operation`): `CallContext`, `CallError`, `Operation`
//! 2. **Middleware** (`middleware`): Tower layers wrapping every operation
//! 3. **Domain services** (`domain`): business logic per service
//! 4. **Operation sets** (`api`): one `BoxOperation` per method, local or remote
//! 5. **Routing** (`router`): RPC dispatch by method name

pub mod api;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod router;

pub use api::{Apis, OperationSource, OrderApi, ProductApi, UserApi};
pub use config::{ChainConfig, DomainConfig};
pub use operation::{BoxOperation, CallContext, CallError, Operation};
pub use router::{EncodedReply, MethodHandler, MethodRouter};
