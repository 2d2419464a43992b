//! WebSocket session and event loop.
//!
//! A [`Connection`] wraps one open WebSocket to the relay. It spawns a
//! tokio task that handles:
//!
//! - Incoming frames from the relay (responses, events)
//! - Outgoing requests from the client
//! - Request/response correlation by UUID
//! - Event handler callbacks
//!
//! When the loop ends it reports why on the `closed` channel, which is what
//! [`super::WsTransport`] watches to drive its reconnect policy.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Event, Request, Response};

use super::{EventHandler, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

/// Shared, swappable event handler slot.
pub(crate) type HandlerSlot = Arc<Mutex<Option<EventHandler>>>;

// ============================================================================
// ReadyData
// ============================================================================

/// Data received in the relay's `ready` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyData {
    /// Relay-assigned connection id.
    pub connection_id: String,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why an event loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::shutdown`] was called.
    Requested,
    /// The socket dropped or errored.
    Lost(String),
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// One WebSocket session with the relay.
///
/// Cheap to clone; all clones drive the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Maximum in-flight requests.
    max_pending: usize,
}

impl Connection {
    /// Creates a connection from an open WebSocket stream.
    ///
    /// Spawns the event loop task. `closed_tx` fires once when it ends.
    pub(crate) fn new<S>(
        ws_stream: WebSocketStream<S>,
        event_handler: HandlerSlot,
        closed_tx: oneshot::Sender<CloseReason>,
        max_pending: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            event_handler,
            closed_tx,
        ));

        Self {
            command_tx,
            correlation,
            max_pending,
        }
    }

    /// Waits for the relay's `ready` frame.
    ///
    /// The relay sends it with the nil request id right after accepting the
    /// socket and validating the access token.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeTimeout`] if `ready` is not received in time
    /// - [`Error::ConnectionClosed`] if the socket closes first
    /// - [`Error::Protocol`] if the relay rejects the handshake
    pub async fn wait_ready(&self, ready_timeout: Duration) -> Result<ReadyData> {
        let (tx, rx) = oneshot::channel();

        self.correlation.lock().insert(RequestId::ready(), tx);

        let response = match timeout(ready_timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => {
                self.correlation.lock().remove(&RequestId::ready());
                return Err(Error::handshake_timeout(ready_timeout.as_millis() as u64));
            }
        };

        let connection_id = response.get_string("connectionId");
        let result = response.into_result()?;
        trace!(?result, "ready payload");

        debug!(%connection_id, "Relay handshake completed");

        Ok(ReadyData { connection_id })
    }

    /// Sends a request and waits for the response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn send(&self, request: Request, request_timeout: Duration) -> Result<Response> {
        let request_id = request.id;

        {
            let correlation = self.correlation.lock();
            if correlation.len() >= self.max_pending {
                warn!(
                    pending = correlation.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    self.max_pending
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` while the event loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        event_handler: HandlerSlot,
        closed_tx: oneshot::Sender<CloseReason>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &event_handler);
                        }

                        Some(Ok(WsMessage::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by relay");
                            break CloseReason::Lost("closed by relay".to_string());
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break CloseReason::Lost(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break CloseReason::Lost("stream ended".to_string());
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("Shutdown requested");
                            let _ = ws_write.close().await;
                            break CloseReason::Requested;
                        }
                    }
                }
            }
        };

        command_rx.close();
        Self::fail_pending_requests(&correlation);

        debug!(?reason, "Event loop terminated");
        let _ = closed_tx.send(reason);
    }

    /// Handles an incoming text frame from the relay.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        event_handler: &HandlerSlot,
    ) {
        if let Ok(response) = from_str::<Response>(text) {
            let tx = correlation.lock().remove(&response.id);

            match tx {
                Some(tx) => {
                    let _ = tx.send(Ok(response));
                }
                None => warn!(id = %response.id, "Response for unknown request"),
            }

            return;
        }

        if let Ok(event) = from_str::<Event>(text) {
            // Clone out of the slot so the handler may replace itself.
            let handler = event_handler.lock().clone();
            if let Some(handler) = handler {
                handler(TransportEvent::Relay(event.parse()));
            }
            return;
        }

        warn!(text = %text, "Failed to parse incoming frame");
    }

    /// Handles a send command.
    async fn handle_send_command<S>(
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Store correlation before sending
        correlation.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(WsMessage::Text(json.into())).await
            && let Some(tx) = correlation.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(%request_id, "Request sent");
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
