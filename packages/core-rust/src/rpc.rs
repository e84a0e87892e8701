//! Binary RPC frames exchanged between gateway clients and domain services.
//!
//! Frames are `MsgPack` maps produced by `rmp_serde::to_vec_named()`; the
//! transport adds a length prefix. A connection carries many concurrent calls,
//! matched by `id`. Bodies are the `MsgPack` encoding of the same request and
//! response structs used on the JSON routes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Why a call failed before producing a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultCode {
    /// The request body could not be decoded.
    Decode,
    /// The server has no handler for the method.
    UnknownMethod,
    /// The server refused the call (breaker open, overloaded, draining).
    Unavailable,
    /// The call exceeded the deadline carried in the request.
    Timeout,
    Internal,
}

/// One message on an RPC connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RpcFrame {
    Request {
        id: u64,
        method: String,
        /// Remaining caller budget in milliseconds; 0 means unbounded.
        timeout_ms: u64,
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
    /// The operation ran. `err` is empty on success, otherwise `body` is empty.
    Reply {
        id: u64,
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
        err: String,
    },
    Fault {
        id: u64,
        code: FaultCode,
        message: String,
    },
}

/// Errors converting frames or bodies to and from `MsgPack`.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl RpcFrame {
    /// Correlation id shared by a request and its answer.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Request { id, .. } | Self::Reply { id, .. } | Self::Fault { id, .. } => *id,
        }
    }

    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// # Errors
    ///
    /// Returns [`FrameError::Decode`] if the bytes are not a valid frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Encodes a request or response body.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decodes a request or response body.
///
/// # Errors
///
/// Returns [`FrameError::Decode`] if the bytes do not match `T`.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FrameError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
