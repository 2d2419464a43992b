//! Typed event bus.
//!
//! Every component reports state changes as [`ClientEvent`]s on one
//! [`EventBus`]. Subscribers get a `tokio::sync::broadcast` receiver; a slow
//! subscriber lags (and sees `RecvError::Lagged`) instead of blocking
//! publishers.
//!
//! # Events
//!
//! | Variant | Published by |
//! |---------|--------------|
//! | [`ClientEvent::StatusChanged`] | ConnectionManager |
//! | [`ClientEvent::MessageReceived`] | MessageChannel, DegradedModeSimulator |
//! | [`ClientEvent::MessageStatusChanged`] | MessageChannel, DegradedModeSimulator |
//! | [`ClientEvent::PresenceChanged`] | PresenceTracker |
//! | [`ClientEvent::Notification`] | MessageChannel (host not in foreground) |

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::broadcast;
use tracing::trace;

use crate::identifiers::{MessageId, UserId};
use crate::message::{Message, MessageStatus};
use crate::session::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ============================================================================
// ClientEvent
// ============================================================================

/// Events emitted by the messaging client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state changed.
    StatusChanged {
        /// New state.
        status: ConnectionState,
        /// Sticky degraded flag.
        degraded: bool,
        /// Consecutive failed handshakes.
        retry_count: u32,
    },

    /// A message arrived.
    MessageReceived {
        /// The message.
        message: Message,
        /// `true` for canned replies produced in degraded mode.
        simulated: bool,
    },

    /// A message moved forward in its delivery status.
    MessageStatusChanged {
        /// Message the status applies to.
        message_id: MessageId,
        /// New status.
        status: MessageStatus,
    },

    /// A counterpart came online or went offline.
    PresenceChanged {
        /// Counterpart.
        user_id: UserId,
        /// New presence.
        online: bool,
    },

    /// Out-of-band alert for a message that arrived while the host was in
    /// the background.
    Notification {
        /// Author of the message.
        sender_id: UserId,
        /// The message.
        message_id: MessageId,
        /// Short preview of the content.
        preview: String,
    },
}

// ============================================================================
// EventBus
// ============================================================================

/// Broadcast channel carrying [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering `capacity` events per subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. The client builder rejects that first.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn publish(&self, event: ClientEvent) {
        trace!(?event, "publish");
        let _ = self.sender.send(event);
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
