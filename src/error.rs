//! Error types for the messaging client.
//!
//! Connectivity failures are absorbed by the session layer and turned into
//! state transitions (retry, then degraded mode). The only errors a caller of
//! the public surface observes are [`Error::Validation`] from `send` /
//! `acknowledge` and [`Error::Config`] from the client builder.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Caller | [`Error::Validation`], [`Error::Config`] |
//! | Session | [`Error::HandshakeTimeout`], [`Error::UnexpectedClose`], [`Error::SendRpcFailure`], [`Error::ThrottledAttempt`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`], [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Caller passed a missing or invalid argument.
    #[error("Validation error: {field} {message}")]
    Validation {
        /// Name of the offending argument.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Relay handshake did not complete in time.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// Transport closed after its own reconnect policy gave up.
    #[error("Connection closed unexpectedly: {reason}")]
    UnexpectedClose {
        /// Close reason reported by the transport.
        reason: String,
    },

    /// The send RPC failed while connected.
    #[error("Send RPC failed: {message}")]
    SendRpcFailure {
        /// Underlying failure.
        message: String,
    },

    /// A connect call was folded into a recent attempt.
    ///
    /// Soft error: logged, never returned to callers.
    #[error("Connect attempt throttled, last attempt {elapsed_ms}ms ago")]
    ThrottledAttempt {
        /// Milliseconds since the last attempt started.
        elapsed_ms: u64,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection is not open.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Relay did not answer a request in time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Protocol violation or error response from the relay.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Relay URL could not be parsed.
    #[error("Invalid relay URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a validation error.
    #[inline]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates an unexpected close error.
    #[inline]
    pub fn unexpected_close(reason: impl Into<String>) -> Self {
        Self::UnexpectedClose {
            reason: reason.into(),
        }
    }

    /// Creates a send RPC failure.
    #[inline]
    pub fn send_rpc_failure(message: impl Into<String>) -> Self {
        Self::SendRpcFailure {
            message: message.into(),
        }
    }

    /// Creates a throttled attempt error.
    #[inline]
    pub fn throttled_attempt(elapsed_ms: u64) -> Self {
        Self::ThrottledAttempt { elapsed_ms }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this error stems from connectivity.
    ///
    /// Connectivity errors are absorbed by the session layer.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::HandshakeTimeout { .. }
                | Self::UnexpectedClose { .. }
                | Self::SendRpcFailure { .. }
                | Self::RequestTimeout { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the caller made a programming mistake.
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Config { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_validation_display() {
        let err = Error::validation("content", "must not be empty");
        assert_eq!(err.to_string(), "Validation error: content must not be empty");
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::handshake_timeout(15_000).is_timeout());
        assert!(Error::request_timeout(RequestId::generate(), 100).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("x").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::unexpected_close("gone").is_connection_error());
        assert!(Error::send_rpc_failure("boom").is_connection_error());
        assert!(!Error::validation("content", "empty").is_connection_error());
        assert!(!Error::throttled_attempt(10).is_connection_error());
    }

    #[test]
    fn test_is_caller_error() {
        assert!(Error::validation("sender_id", "empty").is_caller_error());
        assert!(Error::config("bad url").is_caller_error());
        assert!(!Error::protocol("bad frame").is_caller_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
