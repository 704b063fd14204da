//! Describes window store errors

use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{Display, Formatter}
};

/// A category of a [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: an empty key, a zero window or a zero request ceiling.
    ///
    /// This is a programmer error and must not be retried.
    InvalidConfiguration,

    /// The store is unable to serve the request.
    ///
    /// Should be unreachable for the in-memory store; callers are expected
    /// to fail open when they observe it.
    StoreUnavailable,
}

/// Rate limiting error
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ErrorKind::InvalidConfiguration => write!(f, "Rate Limiting: invalid configuration: {}", self.message),
            ErrorKind::StoreUnavailable => write!(f, "Rate Limiting: store unavailable: {}", self.message),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// Creates an [`ErrorKind::InvalidConfiguration`] error
    #[inline]
    pub fn invalid_configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self { kind: ErrorKind::InvalidConfiguration, message: message.into() }
    }

    /// Creates an [`ErrorKind::StoreUnavailable`] error
    #[inline]
    pub fn store_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self { kind: ErrorKind::StoreUnavailable, message: message.into() }
    }

    /// Returns the category of this error
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message without the category prefix
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this is an [`ErrorKind::InvalidConfiguration`] error.
    #[inline]
    pub fn is_invalid_configuration(&self) -> bool {
        self.kind == ErrorKind::InvalidConfiguration
    }

    /// Check if this is an [`ErrorKind::StoreUnavailable`] error.
    #[inline]
    pub fn is_store_unavailable(&self) -> bool {
        self.kind == ErrorKind::StoreUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_formats_invalid_configuration() {
        let err = Error::invalid_configuration("key must not be empty");

        assert!(err.is_invalid_configuration());
        assert_eq!(err.message(), "key must not be empty");
        assert_eq!(err.to_string(), "Rate Limiting: invalid configuration: key must not be empty");
    }

    #[test]
    fn it_formats_store_unavailable() {
        let err = Error::store_unavailable(format!("shard {} poisoned", 3));

        assert!(err.is_store_unavailable());
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.to_string(), "Rate Limiting: store unavailable: shard 3 poisoned");
    }
}
