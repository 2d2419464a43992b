//! Relay session: connection lifecycle, messaging and presence.
//!
//! # Components
//!
//! | Module | Type | Role |
//! |--------|------|------|
//! | [`manager`] | [`ConnectionManager`] | Lifecycle, retry backoff, throttling, degraded fallback |
//! | [`state`] | [`Connection`] | Pure transition table |
//! | [`timers`] | [`TimerRegistry`] | Ownership of every scheduled task |
//! | [`channel`] | [`MessageChannel`] | Send, receive, acknowledge, status ledger |
//! | [`presence`] | [`PresenceTracker`] | Online set of counterparts |
//! | [`simulator`] | [`DegradedModeSimulator`] | Local stand-in for the relay |

// ============================================================================
// Submodules
// ============================================================================

pub mod channel;
pub mod manager;
pub mod presence;
pub mod simulator;
pub mod state;
pub mod timers;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::MessageChannel;
pub use manager::{ConnectionConfig, ConnectionManager};
pub use presence::{PresenceRecord, PresenceTracker, is_online_status};
pub use simulator::{DegradedModeSimulator, SimulatorConfig, auto_reply};
pub use state::{Connection, ConnectionSnapshot, ConnectionState, RetryPolicy};
pub use timers::TimerRegistry;
