//! Error types for eden
//!
//! This module defines the two error shapes every eden transport agrees on:
//!
//! - **Error**: Client-level errors raised anywhere in the link chain (uses thiserror)
//! - **EdenFetchError**: The `{status, value}` pair surfaced to callers for
//!   application and transport failures
//!
//! # Error Taxonomy
//!
//! - **Transport errors** (connection refused, DNS failure, broken body stream)
//!   are wrapped as `EdenFetchError(422, cause)` at the resolver boundary
//! - **Application errors** (any response with status >= 400) become
//!   `EdenFetchError(status, parsed_body)`
//! - **Configuration errors** (missing terminal link, subscription on an HTTP
//!   link) are `Error::Config` and are never retried
//! - **WebSocket closed errors** are raised to every outstanding
//!   non-subscription request when the socket goes away
//!
//! # Examples
//!
//! ```rust
//! use eden_core::{EdenFetchError, Error};
//! use serde_json::json;
//!
//! let error = EdenFetchError::new(404, json!({"message": "Not found"}));
//! assert_eq!(error.status, 404);
//!
//! let wrapped: Error = error.into();
//! assert!(wrapped.is_fetch());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for eden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status code used when a transport failure has no HTTP status of its own
pub const TRANSPORT_ERROR_STATUS: u16 = 422;

/// Client-level error type for eden operations
///
/// Every link, the resolver and the WebSocket client report failures with
/// this enum. It is `Clone` because one physical failure (a closed socket, a
/// failed batch request) fans out to many waiting operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Application or transport error carrying a status and a payload
    ///
    /// This is the only variant `EdenClient::query` and `mutation` fold back
    /// into the `error` field of a result instead of returning `Err`.
    #[error("{0}")]
    Fetch(#[from] EdenFetchError),

    /// The operation was cancelled through its cancellation token
    #[error("Operation aborted")]
    Aborted,

    /// The WebSocket connection closed while the request was outstanding
    #[error("Connection closed (code: {code:?}, reason: {reason})")]
    ConnectionClosed {
        /// Close code sent by the peer, if any
        code: Option<u16>,
        /// Close reason sent by the peer, possibly empty
        reason: String,
    },

    /// The server did not answer a keep-alive ping in time
    #[error("Keep-alive timeout: no pong received")]
    KeepAliveTimeout,

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A data transformer failed to serialize or deserialize a payload
    #[error("Transformer error: {0}")]
    Transformer(String),

    /// Programmer error in the client configuration
    ///
    /// Raised for a link chain without a terminal link, a subscription sent
    /// through an HTTP-only link, or a request without a domain.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request operation timeout
    #[error("Request timeout")]
    Timeout,
}

impl Error {
    /// Shorthand for a close error without a close frame
    pub fn connection_closed() -> Self {
        Error::ConnectionClosed {
            code: None,
            reason: String::new(),
        }
    }

    /// Whether this error is an application/transport fetch error
    pub fn is_fetch(&self) -> bool {
        matches!(self, Error::Fetch(_))
    }

    /// Whether this error was caused by cancellation
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// The fetch error inside this error, if any
    pub fn as_fetch(&self) -> Option<&EdenFetchError> {
        match self {
            Error::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Error surfaced to callers for a failed HTTP exchange
///
/// `status` is the original HTTP status code (or 422 for transport failures)
/// and `value` is whatever the response body parsed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdenFetchError {
    /// HTTP status code
    pub status: u16,
    /// Parsed response body, or a description of the transport failure
    pub value: serde_json::Value,
}

impl EdenFetchError {
    /// Create a new fetch error
    pub fn new(status: u16, value: serde_json::Value) -> Self {
        Self { status, value }
    }

    /// Wrap a transport failure (network error, broken stream)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use eden_core::EdenFetchError;
    ///
    /// let error = EdenFetchError::transport("connection refused");
    /// assert_eq!(error.status, 422);
    /// assert_eq!(error.value, "connection refused");
    /// ```
    pub fn transport(cause: impl fmt::Display) -> Self {
        Self::new(
            TRANSPORT_ERROR_STATUS,
            serde_json::Value::String(cause.to_string()),
        )
    }
}

impl fmt::Display for EdenFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            serde_json::Value::String(s) => write!(f, "EdenFetchError {}: {}", self.status, s),
            other => write!(f, "EdenFetchError {}: {}", self.status, other),
        }
    }
}

impl std::error::Error for EdenFetchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_error_display() {
        let error = EdenFetchError::new(404, json!("Not found"));
        let display = format!("{}", error);

        assert!(display.contains("404"));
        assert!(display.contains("Not found"));
    }

    #[test]
    fn test_transport_error_status() {
        let error = EdenFetchError::transport("dns failure");
        assert_eq!(error.status, TRANSPORT_ERROR_STATUS);
        assert_eq!(error.value, json!("dns failure"));
    }

    #[test]
    fn test_error_from_fetch_error() {
        let error: Error = EdenFetchError::new(500, json!({"message": "boom"})).into();

        assert!(error.is_fetch());
        assert_eq!(error.as_fetch().map(|e| e.status), Some(500));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let error: Error = serde_error.into();

        match error {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_connection_closed_display() {
        let error = Error::ConnectionClosed {
            code: Some(1006),
            reason: "abnormal".to_string(),
        };
        let display = format!("{}", error);

        assert!(display.contains("1006"));
        assert!(display.contains("abnormal"));
    }

    #[test]
    fn test_fetch_error_serialization() {
        let error = EdenFetchError::new(418, json!({"teapot": true}));
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: EdenFetchError = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, error);
    }
}
