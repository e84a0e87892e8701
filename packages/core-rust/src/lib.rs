//! Storefront core: domain models, `Reply` wrapper, business errors and RPC frames.
//!
//! Everything here is shared by the domain services and by the gateway's
//! clients, so both sides of every transport agree on one set of types.

pub mod error;
pub mod ids;
pub mod model;
pub mod names;
pub mod reply;
pub mod rpc;

pub use error::{BusinessError, ErrorKind};
pub use ids::IdGenerator;
pub use names::{method_names, service_names};
pub use reply::Reply;
pub use rpc::{FaultCode, FrameError, RpcFrame};

