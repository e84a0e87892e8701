//! Generic response wrapper carrying an embedded business error.
//!
//! Every operation answers with a `Reply<T>`. On the JSON wire a reply is the
//! response's own fields plus an `err` member. `err` is `null` on success and
//! the error message otherwise.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::BusinessError;

/// Outcome of one domain operation.
///
/// A failed reply still traversed the wire successfully; transport encoders
/// inspect [`Reply::error`] to pick the error encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T>(Result<T, BusinessError>);

impl<T> Reply<T> {
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self(Ok(value))
    }

    #[must_use]
    pub fn fail(err: BusinessError) -> Self {
        Self(Err(err))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }

    /// Returns the embedded business error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&BusinessError> {
        self.0.as_ref().err()
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.0.as_ref().ok()
    }

    /// Unwraps into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns the embedded business error when the reply failed.
    pub fn into_result(self) -> Result<T, BusinessError> {
        self.0
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        Reply(self.0.map(f))
    }
}

impl<T> From<Result<T, BusinessError>> for Reply<T> {
    fn from(result: Result<T, BusinessError>) -> Self {
        Self(result)
    }
}

impl<T> From<BusinessError> for Reply<T> {
    fn from(err: BusinessError) -> Self {
        Self(Err(err))
    }
}

impl<T: Serialize> Serialize for Reply<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a, T: Serialize> {
            #[serde(flatten)]
            body: Option<&'a T>,
            err: Option<String>,
        }

        let wire = match &self.0 {
            Ok(value) => Wire {
                body: Some(value),
                err: None,
            },
            Err(err) => Wire {
                body: None,
                err: Some(err.to_string()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Reply<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire<T> {
            #[serde(flatten)]
            body: Option<T>,
            #[serde(default)]
            err: Option<String>,
        }

        let wire = Wire::<T>::deserialize(deserializer)?;
        match wire.err.filter(|message| !message.is_empty()) {
            Some(message) => Ok(Self::fail(BusinessError::from_message(&message))),
            None => wire
                .body
                .map(Self::ok)
                .ok_or_else(|| D::Error::custom("reply carries neither a body nor an error")),
        }
    }
}
