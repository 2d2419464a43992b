//! Counterpart presence.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::events::{ClientEvent, EventBus};
use crate::identifiers::UserId;

// ============================================================================
// PresenceRecord
// ============================================================================

/// Presence of one counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceRecord {
    /// Counterpart.
    pub user_id: UserId,
    /// Whether the counterpart is online.
    pub is_online: bool,
}

/// Returns `true` for relay status strings that mean online.
///
/// Accepts `online`, `connected` and `available` in any case.
#[must_use]
pub fn is_online_status(status: &str) -> bool {
    let status = status.trim();
    ["online", "connected", "available"]
        .iter()
        .any(|candidate| status.eq_ignore_ascii_case(candidate))
}

// ============================================================================
// PresenceTracker
// ============================================================================

/// Set of counterparts currently online.
#[derive(Debug)]
pub struct PresenceTracker {
    online: Mutex<FxHashSet<UserId>>,
    bus: EventBus,
}

impl PresenceTracker {
    /// Creates an empty tracker publishing on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            online: Mutex::new(FxHashSet::default()),
            bus,
        }
    }

    /// Records a presence change and publishes it.
    pub fn handle(&self, user_id: UserId, online: bool) -> PresenceRecord {
        {
            let mut set = self.online.lock();
            if online {
                set.insert(user_id.clone());
            } else {
                set.remove(&user_id);
            }
        }

        trace!(%user_id, online, "Presence changed");
        self.bus.publish(ClientEvent::PresenceChanged {
            user_id: user_id.clone(),
            online,
        });

        PresenceRecord {
            user_id,
            is_online: online,
        }
    }

    /// Records a presence change given as a relay status string.
    pub fn handle_status(&self, user_id: UserId, status: &str) -> PresenceRecord {
        self.handle(user_id, is_online_status(status))
    }

    /// Returns `true` if `user_id` is online. `false` for unseen ids.
    #[inline]
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.lock().contains(user_id)
    }

    /// Returns the counterparts currently online, sorted.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.online.lock().iter().cloned().collect();
        users.sort();
        users
    }

    /// Forgets every record.
    pub fn clear(&self) {
        self.online.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
