//! WebSocket [`Transport`] with built-in reconnect supervision.
//!
//! [`WsTransport::connect`] dials `<relay_url>?access_token=<token>`, waits
//! for the relay's `ready` frame and then hands the socket to a supervisor
//! task. If the socket drops without [`Transport::close`] being called, the
//! supervisor walks through [`WsOptions::reconnect_delays`], reporting
//! [`TransportEvent::Reconnecting`] before each try. Success reports
//! [`TransportEvent::Reconnected`]; running out of delays reports
//! [`TransportEvent::Closed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Method, Request};

use super::connection::{CloseReason, HandlerSlot};
use super::{Connection, Credentials, EventHandler, Transport, TransportEvent, TransportState};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for an RPC round trip.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the `ready` frame.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum pending requests before rejecting new ones.
const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// WsOptions
// ============================================================================

/// Tuning for [`WsTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsOptions {
    /// RPC round-trip timeout.
    pub request_timeout: Duration,
    /// Timeout for the relay's `ready` frame.
    pub ready_timeout: Duration,
    /// Cap on in-flight requests.
    pub max_pending: usize,
    /// Delay before each automatic reconnect try. Empty disables it.
    pub reconnect_delays: Vec<Duration>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
            reconnect_delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
            ],
        }
    }
}

impl WsOptions {
    /// Sets the RPC timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the `ready` timeout.
    #[inline]
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Replaces the automatic reconnect schedule.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.reconnect_delays = delays.into_iter().collect();
        self
    }
}

// ============================================================================
// WsTransport
// ============================================================================

/// Shared state behind [`WsTransport`].
struct WsInner {
    options: WsOptions,
    /// Current session, if any.
    connection: Mutex<Option<Connection>>,
    /// Event handler, kept across reconnects.
    handler: HandlerSlot,
    state: Mutex<TransportState>,
    /// Watches the current session and reconnects.
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// WebSocket transport to the message relay.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("state", &*self.inner.state.lock())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(WsOptions::default())
    }
}

impl WsTransport {
    /// Creates an idle transport.
    #[must_use]
    pub fn new(options: WsOptions) -> Self {
        Self {
            inner: Arc::new(WsInner {
                options,
                connection: Mutex::new(None),
                handler: Arc::new(Mutex::new(None)),
                state: Mutex::new(TransportState::Disconnected),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Builds the handshake URL carrying the access token.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `url` does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    pub fn endpoint(url: &str, credentials: &Credentials) -> Result<Url> {
        let mut endpoint = Url::parse(url)?;

        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Relay URL must use ws:// or wss://, got {}",
                endpoint.scheme()
            )));
        }

        endpoint
            .query_pairs_mut()
            .append_pair("access_token", credentials.access_token());

        Ok(endpoint)
    }

    /// Dials the relay and completes the handshake.
    async fn open(
        inner: &Arc<WsInner>,
        endpoint: &Url,
    ) -> Result<(Connection, oneshot::Receiver<CloseReason>)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        let (closed_tx, closed_rx) = oneshot::channel();
        let connection = Connection::new(
            ws_stream,
            Arc::clone(&inner.handler),
            closed_tx,
            inner.options.max_pending,
        );

        match connection.wait_ready(inner.options.ready_timeout).await {
            Ok(ready) => {
                info!(connection_id = %ready.connection_id, "Relay session established");
                Ok((connection, closed_rx))
            }
            Err(e) => {
                connection.shutdown();
                Err(e)
            }
        }
    }

    /// Delivers a lifecycle event to the handler.
    fn emit(inner: &WsInner, event: TransportEvent) {
        let handler = inner.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Watches the current session and runs the reconnect policy.
    async fn supervise(
        inner: Arc<WsInner>,
        endpoint: Url,
        mut closed_rx: oneshot::Receiver<CloseReason>,
    ) {
        loop {
            let reason = match closed_rx.await {
                Ok(CloseReason::Lost(reason)) => reason,
                Ok(CloseReason::Requested) | Err(_) => return,
            };

            warn!(%reason, "Relay session lost");
            inner.connection.lock().take();
            *inner.state.lock() = TransportState::Reconnecting;

            let mut last_error = reason;
            let mut reopened = None;

            for (index, delay) in inner.options.reconnect_delays.iter().enumerate() {
                let attempt = index as u32 + 1;
                Self::emit(&inner, TransportEvent::Reconnecting { attempt });
                sleep(*delay).await;

                match Self::open(&inner, &endpoint).await {
                    Ok(session) => {
                        reopened = Some(session);
                        break;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Automatic reconnect failed");
                        last_error = e.to_string();
                    }
                }
            }

            match reopened {
                Some((connection, next_closed_rx)) => {
                    *inner.connection.lock() = Some(connection);
                    *inner.state.lock() = TransportState::Connected;
                    info!("Relay session restored");
                    Self::emit(&inner, TransportEvent::Reconnected);
                    closed_rx = next_closed_rx;
                }
                None => {
                    *inner.state.lock() = TransportState::Disconnected;
                    warn!(reason = %last_error, "Automatic reconnect exhausted");
                    Self::emit(&inner, TransportEvent::Closed { reason: last_error });
                    return;
                }
            }
        }
    }

    /// Stops the supervisor and the current session.
    fn teardown(inner: &WsInner) {
        if let Some(supervisor) = inner.supervisor.lock().take() {
            supervisor.abort();
        }
        if let Some(connection) = inner.connection.lock().take() {
            connection.shutdown();
        }
        *inner.state.lock() = TransportState::Disconnected;
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str, credentials: &Credentials) -> Result<()> {
        let endpoint = Self::endpoint(url, credentials)?;

        Self::teardown(&self.inner);
        *self.inner.state.lock() = TransportState::Connecting;
        debug!(host = ?endpoint.host_str(), "Connecting to relay");

        match Self::open(&self.inner, &endpoint).await {
            Ok((connection, closed_rx)) => {
                *self.inner.connection.lock() = Some(connection);
                *self.inner.state.lock() = TransportState::Connected;

                let supervisor =
                    tokio::spawn(Self::supervise(Arc::clone(&self.inner), endpoint, closed_rx));
                *self.inner.supervisor.lock() = Some(supervisor);
                Ok(())
            }
            Err(e) => {
                *self.inner.state.lock() = TransportState::Disconnected;
                Err(e)
            }
        }
    }

    async fn invoke(&self, method: Method) -> Result<Value> {
        let connection = self
            .inner
            .connection
            .lock()
            .clone()
            .ok_or(Error::ConnectionClosed)?;

        let name = method.name();
        let response = connection
            .send(Request::new(method), self.inner.options.request_timeout)
            .await?;

        debug!(method = name, success = response.is_success(), "RPC completed");
        response.into_result()
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.inner.handler.lock() = Some(handler);
    }

    fn clear_event_handler(&self) {
        self.inner.handler.lock().take();
    }

    async fn close(&self) {
        Self::teardown(&self.inner);
        debug!("WebSocket transport closed");
    }

    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }
}

// ============================================================================
// Tests
// ============================================================================
