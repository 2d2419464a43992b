//! Transport layer.
//!
//! The session layer only talks to the relay through the [`Transport`]
//! trait: connect, invoke an RPC, receive events, close. [`WsTransport`] is
//! the WebSocket implementation; tests use the scripted
//! [`mock::MockTransport`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌─────────────────┐
//! │ ConnectionManager│                         │                 │
//! │ MessageChannel   │──► Transport ◄──────────│  Message relay  │
//! │ PresenceTracker  │    (WsTransport)  WS    │                 │
//! └──────────────────┘                         └─────────────────┘
//! ```
//!
//! # Lifecycle Events
//!
//! A transport owns its own automatic-reconnect policy. When an established
//! session drops it reports [`TransportEvent::Reconnecting`], then either
//! [`TransportEvent::Reconnected`] or, once the policy is exhausted,
//! [`TransportEvent::Closed`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | One WebSocket session and its event loop |
//! | `websocket` | [`WsTransport`] with reconnect supervision |
//! | `mock` | Scripted in-memory transport (tests) |

// ============================================================================
// Submodules
// ============================================================================

/// One WebSocket session and its event loop.
pub mod connection;

/// WebSocket [`Transport`] implementation.
pub mod websocket;

/// Scripted in-memory transport.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::{Method, RelayEvent};

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ReadyData};
pub use websocket::{WsOptions, WsTransport};

// ============================================================================
// Credentials
// ============================================================================

/// Credentials presented to the relay during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
}

impl Credentials {
    /// Wraps a bearer access token.
    #[inline]
    #[must_use]
    pub fn token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Returns the access token.
    #[inline]
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// TransportState
// ============================================================================

/// Connection state as seen by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No session.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Session dropped, built-in reconnect policy running.
    Reconnecting,
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Notifications a transport delivers to its event handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Established session dropped; the transport is retrying on its own.
    Reconnecting {
        /// 1-based reconnect attempt.
        attempt: u32,
    },
    /// Built-in reconnect succeeded.
    Reconnected,
    /// Built-in reconnect policy exhausted. No further events follow.
    Closed {
        /// Last failure seen.
        reason: String,
    },
    /// Event pushed by the relay.
    Relay(RelayEvent),
}

/// Event handler callback type.
///
/// Called from the transport's I/O task; must not block.
pub type EventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// Bidirectional RPC connection to the message relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session and completes the relay handshake.
    ///
    /// A session that was open is replaced.
    async fn connect(&self, url: &str, credentials: &Credentials) -> Result<()>;

    /// Invokes an RPC method and returns its result payload.
    async fn invoke(&self, method: Method) -> Result<Value>;

    /// Installs the event handler, replacing any previous one.
    fn set_event_handler(&self, handler: EventHandler);

    /// Removes the event handler.
    fn clear_event_handler(&self);

    /// Closes the session and stops the reconnect policy.
    ///
    /// Closing an idle transport is a no-op.
    async fn close(&self);

    /// Returns the transport's own view of the connection.
    fn state(&self) -> TransportState;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = Credentials::token("secret-jwt");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-jwt"));
        assert_eq!(credentials.access_token(), "secret-jwt");
    }
}
