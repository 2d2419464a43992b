//! Scripted in-memory transport.
//!
//! Lets tests drive handshake outcomes, RPC failures and relay events
//! without a socket. Combine with `#[tokio::test(start_paused = true)]` so a
//! hanging handshake resolves through the virtual clock.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::message::MessageStatus;
use crate::protocol::{Method, RelayEvent};

use super::{Credentials, EventHandler, Transport, TransportEvent, TransportState};

// ============================================================================
// Handshake
// ============================================================================

/// Outcome of one scripted handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Handshake completes.
    Succeed,
    /// Handshake fails immediately.
    Fail,
    /// Handshake never completes.
    Hang,
}

// ============================================================================
// MockTransport
// ============================================================================

struct MockInner {
    scripted: Mutex<VecDeque<Handshake>>,
    fallback: Handshake,
    invoke_failure: Mutex<Option<String>>,
    delivery_echo: Mutex<Option<Duration>>,
    connect_calls: AtomicUsize,
    invocations: Mutex<Vec<Method>>,
    handler: Mutex<Option<EventHandler>>,
    state: Mutex<TransportState>,
    next_id: AtomicU64,
}

/// In-memory [`Transport`] with scripted behavior.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Creates a transport whose unscripted handshakes end with `fallback`.
    #[must_use]
    pub fn new(fallback: Handshake) -> Self {
        Self {
            inner: Arc::new(MockInner {
                scripted: Mutex::new(VecDeque::new()),
                fallback,
                invoke_failure: Mutex::new(None),
                delivery_echo: Mutex::new(None),
                connect_calls: AtomicUsize::new(0),
                invocations: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
                state: Mutex::new(TransportState::Disconnected),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Every handshake succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(Handshake::Succeed)
    }

    /// Every handshake fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::new(Handshake::Fail)
    }

    /// Every handshake hangs.
    #[must_use]
    pub fn hanging() -> Self {
        Self::new(Handshake::Hang)
    }

    /// Queues outcomes consumed before the fallback applies.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Handshake>) {
        self.inner.scripted.lock().extend(outcomes);
    }

    /// Makes every subsequent RPC fail with `message`.
    pub fn fail_invocations(&self, message: impl Into<String>) {
        *self.inner.invoke_failure.lock() = Some(message.into());
    }

    /// Pushes a `Delivered` status event `after` each successful send.
    pub fn echo_delivery(&self, after: Duration) {
        *self.inner.delivery_echo.lock() = Some(after);
    }

    /// Delivers an event to the installed handler.
    pub fn emit(&self, event: TransportEvent) {
        let handler = self.inner.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Simulates the relay dropping the session for good.
    pub fn drop_session(&self, reason: impl Into<String>) {
        *self.inner.state.lock() = TransportState::Disconnected;
        self.emit(TransportEvent::Closed {
            reason: reason.into(),
        });
    }

    /// Number of handshakes attempted.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    /// RPCs invoked so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Method> {
        self.inner.invocations.lock().clone()
    }

    /// Returns `true` if an event handler is installed.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.inner.handler.lock().is_some()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str, _credentials: &Credentials) -> Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock() = TransportState::Connecting;

        let outcome = self
            .inner
            .scripted
            .lock()
            .pop_front()
            .unwrap_or(self.inner.fallback);

        match outcome {
            Handshake::Succeed => {
                *self.inner.state.lock() = TransportState::Connected;
                Ok(())
            }
            Handshake::Fail => {
                *self.inner.state.lock() = TransportState::Disconnected;
                Err(Error::connection("scripted handshake failure"))
            }
            Handshake::Hang => std::future::pending().await,
        }
    }

    async fn invoke(&self, method: Method) -> Result<Value> {
        self.inner.invocations.lock().push(method.clone());

        if *self.inner.state.lock() != TransportState::Connected {
            return Err(Error::ConnectionClosed);
        }
        if let Some(message) = self.inner.invoke_failure.lock().clone() {
            return Err(Error::protocol(message));
        }

        match method {
            Method::SendMessage { .. } => {
                let id = MessageId::new(format!(
                    "srv-{}",
                    self.inner.next_id.fetch_add(1, Ordering::SeqCst)
                ));

                let echo = *self.inner.delivery_echo.lock();
                if let Some(after) = echo {
                    let transport = self.clone();
                    let message_id = id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        transport.emit(TransportEvent::Relay(RelayEvent::MessageStatusChanged {
                            message_id,
                            status: MessageStatus::Delivered,
                        }));
                    });
                }

                Ok(json!({ "id": id }))
            }
            Method::MarkDelivered { .. } | Method::MarkRead { .. } => Ok(Value::Null),
        }
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.inner.handler.lock() = Some(handler);
    }

    fn clear_event_handler(&self) {
        self.inner.handler.lock().take();
    }

    async fn close(&self) {
        *self.inner.state.lock() = TransportState::Disconnected;
    }

    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }
}
