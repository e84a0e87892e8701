//! Wire transports: JSON over HTTP for callers, framed `MsgPack` RPC between
//! the gateway and the services.

pub mod http;
pub mod rpc;

pub use http::router;
