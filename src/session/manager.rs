//! Connection lifecycle.
//!
//! [`ConnectionManager`] is the single source of truth for connectivity. It
//! owns the [`Connection`] record, drives the [`Transport`] handshake with a
//! timeout and manual retry backoff, and falls back to degraded mode when the
//! relay stays unreachable. Every transition is published as
//! [`ClientEvent::StatusChanged`].
//!
//! Connectivity failures never reach the caller: [`ConnectionManager::connect`]
//! always resolves to a [`ConnectionSnapshot`].
//!
//! # Attempts
//!
//! | Situation | `connect()` result |
//! |-----------|--------------------|
//! | degraded flag set | `DegradedMode`, transport untouched |
//! | already connected | current snapshot |
//! | attempt in flight | joins it |
//! | last attempt started within `throttle_interval` | that attempt's outcome |
//! | otherwise | new attempt |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::{ClientEvent, EventBus};
use crate::transport::{Credentials, Transport, TransportEvent};

use super::state::{
    Connection, ConnectionSnapshot, ConnectionState, Effect, RetryPolicy, Transition, Trigger,
};
use super::timers::TimerRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Default window in which repeated connects fold into one attempt.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(10);

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Settings for a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Relay endpoint handed to the transport.
    pub url: String,
    /// Window in which repeated connects fold into one attempt.
    pub throttle_interval: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Manual retry policy.
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    /// Creates a config with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Record of the most recent connect attempt.
struct AttemptRecord {
    started_at: Instant,
    outcome: watch::Receiver<Option<ConnectionSnapshot>>,
}

impl AttemptRecord {
    /// Returns `true` while the attempt task is still running.
    fn in_flight(&self) -> bool {
        self.outcome.borrow().is_none() && self.outcome.has_changed().is_ok()
    }
}

/// What `connect()` should do after inspecting state.
enum Begin {
    Settled(ConnectionSnapshot),
    Pending(watch::Receiver<Option<ConnectionSnapshot>>),
}

struct ManagerInner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    timers: Arc<TimerRegistry>,
    /// Lock order: `attempt` before `connection`.
    attempt: Mutex<Option<AttemptRecord>>,
    connection: Mutex<Connection>,
}

/// Owns one logical relay connection.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("connection", &*self.inner.connection.lock())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                bus,
                timers: TimerRegistry::new(),
                attempt: Mutex::new(None),
                connection: Mutex::new(Connection::default()),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns a snapshot of the connection. No side effects.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionSnapshot {
        self.inner.connection.lock().snapshot()
    }

    /// Returns `true` once the session fell back to local simulation.
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner.connection.lock().degraded
    }

    /// Registry owning every task scheduled for this connection.
    #[inline]
    #[must_use]
    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.inner.timers
    }

    /// Manager settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects to the relay.
    ///
    /// Never fails. Resolves once the attempt this call started or joined
    /// has settled, and returns the resulting snapshot.
    pub async fn connect(&self, credentials: &Credentials) -> ConnectionSnapshot {
        let mut outcome = match self.begin(credentials) {
            Begin::Settled(snapshot) => return snapshot,
            Begin::Pending(outcome) => outcome,
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(snapshot) => *snapshot,
            Err(_) => None,
        };

        // Aborted attempts (disconnect, reset) resolve to whatever is current.
        settled.unwrap_or_else(|| self.state())
    }

    /// Stops the transport and cancels every scheduled task.
    ///
    /// No-op when already disconnected. The degraded flag survives.
    pub async fn disconnect(&self) {
        if self.transition(Trigger::DisconnectRequested).is_none() {
            return;
        }

        self.teardown().await;
        self.transition(Trigger::DisconnectCompleted);
        info!("Disconnected from relay");
    }

    /// Tears down like [`disconnect`](Self::disconnect) and clears the
    /// degraded flag, retry count and throttle record.
    pub async fn reset(&self) {
        // Disconnecting until teardown finishes, so no attempt starts meanwhile.
        self.transition(Trigger::Reset);
        self.teardown().await;
        self.transition(Trigger::DisconnectCompleted);
        info!("Connection reset");
    }

    /// Falls back to degraded mode after a failed send.
    pub async fn degrade(&self, reason: &str) -> ConnectionSnapshot {
        if let Some(transition) = self.transition(Trigger::SendFailed)
            && transition.effect == Effect::EnterDegraded
        {
            warn!(%reason, "Send failed, switching to degraded mode");
            self.enter_degraded().await;
        }
        self.state()
    }

    /// Applies a transport lifecycle event. Relay events are ignored.
    pub fn handle_transport_event(&self, event: &TransportEvent) {
        let trigger = match event {
            TransportEvent::Reconnecting { attempt } => {
                info!(attempt, "Relay reconnecting");
                Trigger::TransportReconnecting
            }
            TransportEvent::Reconnected => Trigger::TransportReconnected,
            TransportEvent::Closed { reason } => {
                let error = Error::unexpected_close(reason.as_str());
                warn!(error = %error, "Relay session closed");
                Trigger::TransportClosed
            }
            TransportEvent::Relay(_) => return,
        };

        if let Some(transition) = self.transition(trigger)
            && transition.effect == Effect::EnterDegraded
        {
            let manager = self.clone();
            self.inner.timers.spawn(async move {
                manager.enter_degraded().await;
            });
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Decides whether `connect()` settles now, joins or starts an attempt.
    fn begin(&self, credentials: &Credentials) -> Begin {
        let now = Instant::now();
        let mut attempt = self.inner.attempt.lock();
        let current = self.state();

        if current.degraded {
            self.transition(Trigger::ConnectRequested { at: now });
            return Begin::Settled(self.state());
        }

        if current.state == ConnectionState::Connected {
            return Begin::Settled(current);
        }

        if let Some(record) = attempt.as_ref() {
            if record.in_flight() {
                debug!("Joining in-flight connect attempt");
                return Begin::Pending(record.outcome.clone());
            }

            let elapsed = now.saturating_duration_since(record.started_at);
            if elapsed < self.inner.config.throttle_interval && record.outcome.borrow().is_some() {
                let throttled = Error::throttled_attempt(elapsed.as_millis() as u64);
                debug!(error = %throttled, "Connect coalesced");
                return Begin::Settled(current);
            }
        }

        match self.transition(Trigger::ConnectRequested { at: now }) {
            Some(Transition {
                effect: Effect::StartHandshake,
                ..
            }) => {}
            _ => return Begin::Settled(self.state()),
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        *attempt = Some(AttemptRecord {
            started_at: now,
            outcome: outcome_rx.clone(),
        });

        let manager = self.clone();
        let credentials = credentials.clone();
        self.inner.timers.spawn(async move {
            let snapshot = manager.run_attempt(&credentials).await;
            let _ = outcome_tx.send(Some(snapshot));
        });

        Begin::Pending(outcome_rx)
    }

    /// Runs handshakes until one succeeds or retries are exhausted.
    async fn run_attempt(&self, credentials: &Credentials) -> ConnectionSnapshot {
        let config = &self.inner.config;
        let transport = &self.inner.transport;

        loop {
            debug!(url = %config.url, "Starting handshake");

            let handshake = transport.connect(&config.url, credentials);
            let result = match timeout(config.connect_timeout, handshake).await {
                Ok(result) => result,
                Err(_) => {
                    transport.close().await;
                    Err(Error::handshake_timeout(
                        config.connect_timeout.as_millis() as u64,
                    ))
                }
            };

            let succeeded = result.is_ok();
            let trigger = match result {
                Ok(()) => Trigger::HandshakeSucceeded,
                Err(e) => {
                    warn!(error = %e, "Handshake failed");
                    Trigger::HandshakeFailed
                }
            };

            let Some(transition) = self.transition(trigger) else {
                // Torn down while the handshake was in flight.
                if succeeded {
                    transport.close().await;
                }
                return self.state();
            };

            match transition.effect {
                Effect::ScheduleRetry(delay) => {
                    info!(
                        retry_count = transition.next.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying handshake"
                    );
                    sleep(delay).await;
                }
                Effect::EnterDegraded => {
                    self.enter_degraded().await;
                    return transition.next.snapshot();
                }
                _ => {
                    info!("Connected to relay");
                    return transition.next.snapshot();
                }
            }
        }
    }

    /// Applies `trigger` and publishes the new status.
    fn transition(&self, trigger: Trigger) -> Option<Transition> {
        let mut connection = self.inner.connection.lock();
        let transition = connection.apply(trigger, &self.inner.config.retry)?;
        *connection = transition.next;

        debug!(
            ?trigger,
            state = %transition.next.state,
            retry_count = transition.next.retry_count,
            degraded = transition.next.degraded,
            "Connection transition"
        );

        // Published under the lock so subscribers see transitions in order.
        self.inner.bus.publish(ClientEvent::StatusChanged {
            status: transition.next.state,
            degraded: transition.next.degraded,
            retry_count: transition.next.retry_count,
        });

        Some(transition)
    }

    async fn enter_degraded(&self) {
        self.inner.transport.close().await;
        warn!("Relay unreachable, degraded mode active");
    }

    async fn teardown(&self) {
        self.inner.attempt.lock().take();
        self.inner.timers.cancel_all().await;
        self.inner.transport.close().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::{Handshake, MockTransport};

    fn manager(transport: &MockTransport) -> (ConnectionManager, EventBus) {
        let bus = EventBus::new(64);
        let manager = ConnectionManager::new(
            ConnectionConfig::new("ws://relay.test/hub"),
            Arc::new(transport.clone()),
            bus.clone(),
        );
        (manager, bus)
    }

    fn token() -> Credentials {
        Credentials::token("token")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let transport = MockTransport::succeeding();
        let (manager, bus) = manager(&transport);
        let mut events = bus.subscribe();

        let snapshot = manager.connect(&token()).await;
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(transport.connect_calls(), 1);

        let first = events.recv().await.expect("connecting");
        assert!(matches!(
            first,
            ClientEvent::StatusChanged {
                status: ConnectionState::Connecting,
                ..
            }
        ));
        let second = events.recv().await.expect("connected");
        assert!(matches!(
            second,
            ClientEvent::StatusChanged {
                status: ConnectionState::Connected,
                degraded: false,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_attempt() {
        let transport = MockTransport::hanging();
        transport.script([Handshake::Succeed]);
        let (manager, _bus) = manager(&transport);

        let credentials = token();
        let (a, b, c) = tokio::join!(
            manager.connect(&credentials),
            manager.connect(&credentials),
            manager.connect(&credentials)
        );

        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(a.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_degrades() {
        let transport = MockTransport::failing();
        let (manager, _bus) = manager(&transport);

        let started = Instant::now();
        let snapshot = manager.connect(&token()).await;

        assert_eq!(snapshot.state, ConnectionState::DegradedMode);
        assert!(snapshot.degraded);
        assert_eq!(snapshot.retry_count, 3);
        assert_eq!(transport.connect_calls(), 3);
        // Backoff of 2s then 4s between the three handshakes.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_counts_as_failure() {
        let transport = MockTransport::hanging();
        transport.script([Handshake::Hang, Handshake::Succeed]);
        let (manager, _bus) = manager(&transport);

        let snapshot = manager.connect(&token()).await;
        assert!(snapshot.is_connected());
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_connect_skips_transport() {
        let transport = MockTransport::failing();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;
        assert_eq!(transport.connect_calls(), 3);

        tokio::time::advance(DEFAULT_THROTTLE_INTERVAL * 2).await;

        let started = Instant::now();
        let snapshot = manager.connect(&token()).await;
        assert_eq!(snapshot.state, ConnectionState::DegradedMode);
        assert_eq!(transport.connect_calls(), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_preserves_degraded_flag() {
        let transport = MockTransport::failing();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        manager.disconnect().await;
        let snapshot = manager.state();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.degraded);

        let snapshot = manager.connect(&token()).await;
        assert_eq!(snapshot.state, ConnectionState::DegradedMode);
        assert_eq!(transport.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let transport = MockTransport::failing();
        let (manager, _bus) = manager(&transport);

        let connecting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&token()).await })
        };

        // First handshake fails, backoff of 2s is pending.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.connect_calls(), 1);

        manager.disconnect().await;
        assert_eq!(manager.timers().pending(), 0);

        let snapshot = connecting.await.expect("join");
        assert!(!snapshot.is_connected());
        assert!(!snapshot.degraded);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(manager.state().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_idle_is_noop() {
        let transport = MockTransport::succeeding();
        let (manager, bus) = manager(&transport);
        let mut events = bus.subscribe();

        manager.disconnect().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_degrades_without_retry() {
        let transport = MockTransport::succeeding();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        manager.handle_transport_event(&TransportEvent::Closed {
            reason: "gone".into(),
        });

        let snapshot = manager.state();
        assert_eq!(snapshot.state, ConnectionState::DegradedMode);
        assert!(snapshot.degraded);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_reconnect_events() {
        let transport = MockTransport::succeeding();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        manager.handle_transport_event(&TransportEvent::Reconnecting { attempt: 1 });
        assert_eq!(manager.state().state, ConnectionState::Reconnecting);

        manager.handle_transport_event(&TransportEvent::Reconnected);
        assert_eq!(manager.state().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_connect_reports_current_state() {
        let transport = MockTransport::succeeding();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        manager.handle_transport_event(&TransportEvent::Reconnecting { attempt: 1 });

        let snapshot = manager.connect(&token()).await;
        assert_eq!(snapshot.state, ConnectionState::Reconnecting);
        assert_eq!(snapshot, manager.state());
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_reset_starts_no_attempt() {
        let transport = MockTransport::succeeding();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        // Hold a timer open so the reset teardown has something to join.
        manager.timers().spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let credentials = token();
        let ((), during) = tokio::join!(manager.reset(), manager.connect(&credentials));
        assert_eq!(during.state, ConnectionState::Disconnecting);

        let snapshot = manager.state();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(!snapshot.degraded);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_degraded() {
        let transport = MockTransport::failing();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        manager.reset().await;
        let snapshot = manager.state();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.retry_count, 0);

        transport.script([Handshake::Succeed]);
        let snapshot = manager.connect(&token()).await;
        assert!(snapshot.is_connected());
        assert_eq!(transport.connect_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrade_after_send_failure() {
        let transport = MockTransport::succeeding();
        let (manager, _bus) = manager(&transport);
        manager.connect(&token()).await;

        let snapshot = manager.degrade("rpc failed").await;
        assert_eq!(snapshot.state, ConnectionState::DegradedMode);
        assert_eq!(transport.state(), crate::transport::TransportState::Disconnected);
    }
}
