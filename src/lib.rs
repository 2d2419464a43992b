//! Relay Messaging - real-time chat client for marketplace apps.
//!
//! This library keeps one persistent WebSocket session to a message relay,
//! tracks delivery and read acknowledgments and counterpart presence, and
//! keeps working when the relay cannot be reached.
//!
//! # Architecture
//!
//! The client is a small composition of independent components:
//!
//! - **Transport**: connect / invoke / event primitives behind the
//!   [`Transport`] trait, with automatic reconnect built into [`WsTransport`]
//! - **ConnectionManager**: lifecycle, handshake timeout, retry backoff,
//!   attempt throttling and the fallback to degraded mode
//! - **MessageChannel**: send, receive, acknowledge, per-message status
//! - **PresenceTracker**: which counterparts are online
//! - **DegradedModeSimulator**: local stand-in for the relay
//! - **EventBus**: typed [`ClientEvent`] broadcast to subscribers
//!
//! Key design principles:
//!
//! - Connectivity failures never surface as errors; they become state
//!   transitions and [`ClientEvent::StatusChanged`] events
//! - Composition works in every connection state
//! - Message status only moves forward
//! - Every timer belongs to one manager and dies with `disconnect()`
//!
//! # Quick Start
//!
//! ```no_run
//! use relay_messaging::{AckKind, MessagingClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = MessagingClient::builder()
//!         .relay_url("wss://relay.example.com/hubs/chat")
//!         .build()?;
//!
//!     let state = client.connect("access-token").await;
//!     println!("Connection: {}", state.state);
//!
//!     let id = client.send("consumer-1", "provider-9", "Hello!").await?;
//!     client.acknowledge(id.as_str(), AckKind::Read).await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`MessagingClient`], builder and options |
//! | [`session`] | Connection manager, message channel, presence, simulator |
//! | [`events`] | [`ClientEvent`] and [`EventBus`] |
//! | [`message`] | [`Message`] and [`MessageStatus`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Relay wire types |
//! | [`transport`] | Transport trait and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Messaging client and configuration.
///
/// Use [`MessagingClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed client events and the broadcast bus.
pub mod events;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing message, user and request IDs.
pub mod identifiers;

/// Messages and delivery status.
pub mod message;

/// Relay wire types.
///
/// Request/response envelopes, RPC methods and inbound events.
pub mod protocol;

/// Connection lifecycle and messaging components.
pub mod session;

/// Transport abstraction.
///
/// The [`Transport`] trait plus the WebSocket transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientBuilder, ClientOptions, MessagingClient};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{ClientEvent, EventBus};

// Identifier types
pub use identifiers::{MessageId, RequestId, UserId};

// Message types
pub use message::{AckKind, Message, MessageStatus};

// Session types
pub use session::{ConnectionSnapshot, ConnectionState};

// Transport types
pub use transport::{Credentials, Transport, TransportEvent, TransportState, WsOptions, WsTransport};
