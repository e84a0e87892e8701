//! Business errors shared by every domain service.
//!
//! A `BusinessError` is a result, not a failure of the call: it travels inside
//! [`Reply`](crate::Reply) across both transports and is never retried. The
//! display message is the wire representation, so every variant must survive
//! a `to_string()` / [`BusinessError::from_message`] round trip.

use thiserror::Error;

/// Coarse classification used by transport encoders to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request was understood but its content is invalid.
    Validation,
    /// The addressed record does not exist.
    NotFound,
    /// The request conflicts with existing state.
    Conflict,
    /// Credentials were missing or wrong.
    Unauthorized,
    /// Anything the service could not classify.
    Internal,
}

/// Errors produced by domain logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("can't sum two zeroes")]
    TwoZeroes,
    #[error("integer overflow")]
    IntOverflow,
    #[error("result exceeds maximum size")]
    MaxSizeExceeded,
    #[error("Error missing {0}")]
    MissingField(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("userID or tenantID is required.")]
    MissingOwner,
    #[error("not found user")]
    UserNotFound,
    #[error("username already existing")]
    UserAlreadyExisting,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("not found order")]
    OrderNotFound,
    #[error("not found cart item")]
    CartItemNotFound,
    /// Free-form message from a service that has no dedicated variant.
    #[error("{0}")]
    Other(String),
}

const MISSING_FIELD_PREFIX: &str = "Error missing ";

impl BusinessError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TwoZeroes
            | Self::IntOverflow
            | Self::MaxSizeExceeded
            | Self::MissingField(_)
            | Self::ChecksumMismatch
            | Self::MissingOwner => ErrorKind::Validation,
            Self::UserNotFound | Self::OrderNotFound | Self::CartItemNotFound => {
                ErrorKind::NotFound
            }
            Self::UserAlreadyExisting => ErrorKind::Conflict,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Rebuilds an error from its wire message.
    ///
    /// Unknown messages become [`BusinessError::Other`] so nothing is lost.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        match message {
            "can't sum two zeroes" => Self::TwoZeroes,
            "integer overflow" => Self::IntOverflow,
            "result exceeds maximum size" => Self::MaxSizeExceeded,
            "checksum mismatch" => Self::ChecksumMismatch,
            "userID or tenantID is required." => Self::MissingOwner,
            "not found user" => Self::UserNotFound,
            "username already existing" => Self::UserAlreadyExisting,
            "Unauthorized" => Self::Unauthorized,
            "not found order" => Self::OrderNotFound,
            "not found cart item" => Self::CartItemNotFound,
            other => match other.strip_prefix(MISSING_FIELD_PREFIX) {
                Some(field) if !field.is_empty() => Self::MissingField(field.to_string()),
                _ => Self::Other(other.to_string()),
            },
        }
    }
}
