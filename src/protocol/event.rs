//! Inbound relay event types.
//!
//! Events are pushed by the relay without a preceding request.
//!
//! # Event Types
//!
//! | Method | Parsed as |
//! |--------|-----------|
//! | `chat.messageReceived` | [`RelayEvent::MessageReceived`] |
//! | `chat.messageStatus` | [`RelayEvent::MessageStatusChanged`] |
//! | `presence.changed` | [`RelayEvent::PresenceChanged`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::identifiers::{MessageId, UserId};
use crate::message::{Message, MessageStatus, unix_millis};

// ============================================================================
// Event
// ============================================================================

/// A raw event frame from the relay.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type marker (always "event").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Creates an event frame.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            event_type: "event".to_string(),
            method: method.into(),
            params,
        }
    }

    /// Creates a `chat.messageReceived` frame for `message`.
    #[must_use]
    pub fn message_received(message: &Message) -> Self {
        Self::new(
            "chat.messageReceived",
            json!({
                "id": message.id,
                "senderId": message.sender_id,
                "receiverId": message.receiver_id,
                "content": message.content,
                "createdAt": message.created_at,
            }),
        )
    }

    /// Creates a `chat.messageStatus` frame.
    #[must_use]
    pub fn message_status(message_id: &MessageId, status: MessageStatus) -> Self {
        Self::new(
            "chat.messageStatus",
            json!({ "messageId": message_id, "status": status }),
        )
    }

    /// Creates a `presence.changed` frame.
    #[must_use]
    pub fn presence(user_id: &UserId, status: &str) -> Self {
        Self::new(
            "presence.changed",
            json!({ "userId": user_id, "status": status }),
        )
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> RelayEvent {
        match self.method.as_str() {
            "chat.messageReceived" => {
                let created_at = match self.get_u64("createdAt") {
                    0 => unix_millis(),
                    ts => ts,
                };

                RelayEvent::MessageReceived(Message {
                    id: MessageId::new(self.get_string("id")),
                    sender_id: UserId::new(self.get_string("senderId")),
                    receiver_id: UserId::new(self.get_string("receiverId")),
                    content: self.get_string("content"),
                    created_at,
                    status: MessageStatus::Delivered,
                })
            }

            "chat.messageStatus" => match MessageStatus::parse(&self.get_string("status")) {
                Some(status) => RelayEvent::MessageStatusChanged {
                    message_id: MessageId::new(self.get_string("messageId")),
                    status,
                },
                None => self.unknown(),
            },

            "presence.changed" => RelayEvent::PresenceChanged {
                user_id: UserId::new(self.get_string("userId")),
                status: self.get_string("status"),
            },

            _ => self.unknown(),
        }
    }

    fn unknown(&self) -> RelayEvent {
        RelayEvent::Unknown {
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }

    /// Gets a string from params.
    #[inline]
    fn get_string(&self, key: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 from params.
    #[inline]
    fn get_u64(&self, key: &str) -> u64 {
        self.params
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }
}

// ============================================================================
// RelayEvent
// ============================================================================

/// Parsed relay events for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A counterpart sent us a message.
    MessageReceived(Message),

    /// The relay reports progress on a message we sent.
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
        /// Raw relay status string, normalized by the presence tracker.
        status: String,
    },

    /// Unknown event type.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================
