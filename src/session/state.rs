//! Connection state machine.
//!
//! [`Connection::apply`] is a pure function from (current connection,
//! trigger) to the next connection plus the side effect the manager must
//! run. Triggers that make no sense in the current state return `None` and
//! leave the connection untouched.
//!
//! # Transition Table
//!
//! | From | Trigger | To | Effect |
//! |------|---------|----|--------|
//! | any (degraded flag set) | `ConnectRequested` | DegradedMode | none |
//! | Disconnected | `ConnectRequested` | Connecting | `StartHandshake` |
//! | Connecting, Reconnecting | `HandshakeSucceeded` | Connected | none |
//! | Connecting, Reconnecting | `HandshakeFailed` (retries left) | Reconnecting | `ScheduleRetry` |
//! | Connecting, Reconnecting | `HandshakeFailed` (exhausted) | DegradedMode | `EnterDegraded` |
//! | Connected | `TransportReconnecting` | Reconnecting | none |
//! | Reconnecting | `TransportReconnected` | Connected | none |
//! | Connected, Reconnecting | `TransportClosed`, `SendFailed` | DegradedMode | `EnterDegraded` |
//! | not Disconnected/Disconnecting | `DisconnectRequested` | Disconnecting | `Teardown` |
//! | Disconnecting | `DisconnectCompleted` | Disconnected | none |
//! | any | `Reset` | Disconnecting (flags cleared) | `Teardown` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none requested.
    Disconnected,
    /// First handshake in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Retrying, either through backoff or the transport's own policy.
    Reconnecting,
    /// Teardown in progress.
    Disconnecting,
    /// Local simulation replaces the relay for the rest of the session.
    DegradedMode,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnecting => "disconnecting",
            Self::DegradedMode => "degraded",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Manual retry policy applied to failed handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed handshakes before degrading.
    pub max_retries: u32,
    /// Backoff grows by this step per failure.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows the `retry_count`-th failure.
    #[inline]
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.backoff_step.saturating_mul(retry_count)
    }
}

// ============================================================================
// Trigger / Effect
// ============================================================================

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A caller asked to connect.
    ConnectRequested {
        /// When the request was made.
        at: Instant,
    },
    /// Handshake completed.
    HandshakeSucceeded,
    /// Handshake failed or timed out.
    HandshakeFailed,
    /// Transport lost its session and is retrying on its own.
    TransportReconnecting,
    /// Transport restored its session.
    TransportReconnected,
    /// Transport gave up.
    TransportClosed,
    /// Send RPC failed while connected.
    SendFailed,
    /// A caller asked to disconnect.
    DisconnectRequested,
    /// Teardown finished.
    DisconnectCompleted,
    /// Explicit session restart.
    Reset,
}

/// Side effect the manager must run after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to do.
    None,
    /// Start a handshake now.
    StartHandshake,
    /// Retry the handshake after a delay.
    ScheduleRetry(Duration),
    /// Stop the transport; the simulator takes over.
    EnterDegraded,
    /// Stop the transport and cancel every timer.
    Teardown,
}

/// Result of a successful [`Connection::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Connection after the transition.
    pub next: Connection,
    /// Side effect to run.
    pub effect: Effect,
}

// ============================================================================
// Connection
// ============================================================================

/// The one connection record owned by a `ConnectionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed handshakes.
    pub retry_count: u32,
    /// Sticky until [`Trigger::Reset`].
    pub degraded: bool,
    /// Start of the most recent connect attempt.
    pub last_attempt_at: Option<Instant>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            degraded: false,
            last_attempt_at: None,
        }
    }
}

/// Read-only view of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed handshakes.
    pub retry_count: u32,
    /// Sticky degraded flag.
    pub degraded: bool,
}

impl ConnectionSnapshot {
    /// Returns `true` if the relay session is usable.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Connection {
    /// Returns a read-only view.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            retry_count: self.retry_count,
            degraded: self.degraded,
        }
    }

    /// Computes the transition for `trigger`, or `None` if it is ignored.
    #[must_use]
    pub fn apply(&self, trigger: Trigger, policy: &RetryPolicy) -> Option<Transition> {
        use ConnectionState as S;

        let moved = |next: Connection, effect: Effect| Some(Transition { next, effect });

        match (self.state, trigger) {
            (_, Trigger::Reset) => moved(
                Connection {
                    state: S::Disconnecting,
                    ..Connection::default()
                },
                Effect::Teardown,
            ),

            (S::Disconnecting, Trigger::DisconnectCompleted) => moved(
                Connection {
                    state: S::Disconnected,
                    ..*self
                },
                Effect::None,
            ),

            (S::Disconnected | S::Disconnecting, Trigger::DisconnectRequested) => None,

            (_, Trigger::DisconnectRequested) => moved(
                Connection {
                    state: S::Disconnecting,
                    ..*self
                },
                Effect::Teardown,
            ),

            (S::Disconnecting, _) => None,

            (S::DegradedMode, _) => None,

            (_, Trigger::ConnectRequested { .. }) if self.degraded => moved(
                Connection {
                    state: S::DegradedMode,
                    ..*self
                },
                Effect::None,
            ),

            (S::Disconnected, Trigger::ConnectRequested { at }) => moved(
                Connection {
                    state: S::Connecting,
                    last_attempt_at: Some(at),
                    ..*self
                },
                Effect::StartHandshake,
            ),

            (S::Connecting | S::Reconnecting, Trigger::HandshakeSucceeded) => moved(
                Connection {
                    state: S::Connected,
                    retry_count: 0,
                    ..*self
                },
                Effect::None,
            ),

            (S::Connecting | S::Reconnecting, Trigger::HandshakeFailed) => {
                let retry_count = self.retry_count.saturating_add(1);

                if retry_count >= policy.max_retries {
                    moved(
                        Connection {
                            state: S::DegradedMode,
                            retry_count,
                            degraded: true,
                            ..*self
                        },
                        Effect::EnterDegraded,
                    )
                } else {
                    moved(
                        Connection {
                            state: S::Reconnecting,
                            retry_count,
                            ..*self
                        },
                        Effect::ScheduleRetry(policy.backoff(retry_count)),
                    )
                }
            }

            (S::Connected, Trigger::TransportReconnecting) => moved(
                Connection {
                    state: S::Reconnecting,
                    ..*self
                },
                Effect::None,
            ),

            (S::Reconnecting, Trigger::TransportReconnected) => moved(
                Connection {
                    state: S::Connected,
                    retry_count: 0,
                    ..*self
                },
                Effect::None,
            ),

            (S::Connected | S::Reconnecting, Trigger::TransportClosed | Trigger::SendFailed) => {
                moved(
                    Connection {
                        state: S::DegradedMode,
                        degraded: true,
                        ..*self
                    },
                    Effect::EnterDegraded,
                )
            }

            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
