//! Relay protocol message types.
//!
//! This module defines the JSON frames exchanged with the message relay.
//! Only [`crate::transport::WsTransport`] touches these on the wire; the
//! session layer works with [`Method`] and [`RelayEvent`].
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Relay | RPC invocation |
//! | `Response` | Relay → Client | RPC result (and the `ready` handshake) |
//! | `Event` | Relay → Client | Inbound message, status or presence push |
//!
//! # Method Naming
//!
//! Methods follow `module.methodName` format:
//!
//! - `chat.sendMessage`
//! - `chat.markDelivered`
//! - `chat.markRead`

// ============================================================================
// Submodules
// ============================================================================

/// Inbound relay event types.
pub mod event;

/// RPC method definitions.
pub mod method;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{Event, RelayEvent};
pub use method::Method;
pub use request::{Request, Response, ResponseType};
