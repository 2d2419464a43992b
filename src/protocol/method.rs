//! RPC methods the client invokes on the relay.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::{MessageId, UserId};

// ============================================================================
// Method
// ============================================================================

/// Relay RPC methods.
///
/// Serialized as `{"method": "chat.sendMessage", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Method {
    /// Submit a new message. The relay answers with `{"id": "..."}`.
    #[serde(rename = "chat.sendMessage")]
    SendMessage {
        /// Author.
        #[serde(rename = "senderId")]
        sender_id: UserId,
        /// Recipient.
        #[serde(rename = "receiverId")]
        receiver_id: UserId,
        /// Text body.
        content: String,
    },

    /// Confirm a message reached this device.
    #[serde(rename = "chat.markDelivered")]
    MarkDelivered {
        /// Acknowledged message.
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },

    /// Confirm a message was displayed.
    #[serde(rename = "chat.markRead")]
    MarkRead {
        /// Acknowledged message.
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl Method {
    /// Returns the wire method name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "chat.sendMessage",
            Self::MarkDelivered { .. } => "chat.markDelivered",
            Self::MarkRead { .. } => "chat.markRead",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
