//! Binary RPC between the gateway and the domain services.

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod server;

pub use client::{RpcClient, RpcClientConfig};
pub use codec::{CodecError, FrameCodec};
pub use endpoint::{RpcEndpoint, RpcEndpointFactory};
pub use server::{RpcServer, DEFAULT_MAX_FRAME_LEN};
