//! Chat message model and delivery status ordering.
//!
//! Status only moves forward:
//!
//! ```text
//! Sending → Sent → Delivered → Read
//!    │        │        │
//!    └────────┴────────┴──→ Failed
//! ```
//!
//! Steps may be skipped (`Sending → Delivered` is fine). `Read` and `Failed`
//! are terminal.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identifiers::{MessageId, UserId};

// ============================================================================
// MessageStatus
// ============================================================================

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Handed to the client, not yet confirmed by the relay.
    Sending,
    /// Accepted by the relay.
    Sent,
    /// Reached the recipient's device.
    Delivered,
    /// Seen by the recipient.
    Read,
    /// Gave up on delivery.
    Failed,
}

impl MessageStatus {
    /// Position along the happy path. `Failed` sits outside it.
    #[inline]
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Returns `true` if no further transition is allowed.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }

    /// Returns `true` if moving from `self` to `next` keeps the order.
    ///
    /// Re-applying the current status is not an advance.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            (None, Some(_)) => false,
        }
    }

    /// Parses a relay status string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" | "seen" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// AckKind
// ============================================================================

/// Acknowledgment a recipient sends back for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckKind {
    /// Message reached this device.
    Delivered,
    /// Message was displayed to the user.
    Read,
}

impl From<AckKind> for MessageStatus {
    fn from(kind: AckKind) -> Self {
        match kind {
            AckKind::Delivered => Self::Delivered,
            AckKind::Read => Self::Read,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A chat message between two marketplace users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Relay-issued or synthesized id.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Delivery status.
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            content: content.into(),
            created_at: unix_millis(),
            status,
        }
    }

    /// Returns `true` if the message only exists locally.
    #[inline]
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.id.is_simulated()
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
