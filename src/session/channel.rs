//! Sending, receiving and acknowledging messages.
//!
//! [`MessageChannel`] sends over the relay while connected and through the
//! [`DegradedModeSimulator`] in degraded mode. A send RPC failure degrades
//! the connection and the message is simulated instead. In any other state
//! (reconnecting, disconnected) the send is recorded as failed so the UI can
//! offer a resend. Composing never blocks and the caller only ever sees
//! [`Error::Validation`].
//!
//! Every status change passes through one ledger that refuses regressions:
//! a message never goes back from `Read` to `Delivered`, and `Failed` is
//! final.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus};
use crate::identifiers::{MessageId, UserId};
use crate::message::{AckKind, Message, MessageStatus};
use crate::protocol::{Method, RelayEvent};
use crate::transport::Transport;

use super::manager::ConnectionManager;
use super::simulator::{DegradedModeSimulator, SimulatorConfig};

// ============================================================================
// Constants
// ============================================================================

/// Characters of content kept in a notification preview.
const PREVIEW_CHARS: usize = 80;

// ============================================================================
// StatusLedger
// ============================================================================

/// Latest known status per message.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusLedger {
    statuses: Arc<Mutex<FxHashMap<MessageId, MessageStatus>>>,
}

impl StatusLedger {
    /// Records `status` if it moves `message_id` forward.
    ///
    /// Unknown ids accept any status. Returns `true` if the ledger changed.
    pub(crate) fn advance(&self, message_id: &MessageId, status: MessageStatus) -> bool {
        let mut statuses = self.statuses.lock();
        match statuses.get(message_id) {
            Some(current) if !current.can_advance_to(status) => {
                trace!(%message_id, %current, %status, "Status change refused");
                false
            }
            _ => {
                statuses.insert(message_id.clone(), status);
                true
            }
        }
    }

    pub(crate) fn get(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.statuses.lock().get(message_id).copied()
    }

    pub(crate) fn clear(&self) {
        self.statuses.lock().clear();
    }
}

// ============================================================================
// MessageChannel
// ============================================================================

struct ChannelInner {
    manager: ConnectionManager,
    transport: Arc<dyn Transport>,
    simulator: DegradedModeSimulator,
    ledger: StatusLedger,
    bus: EventBus,
    foreground: AtomicBool,
}

/// Message send / receive / acknowledgment over the active backing.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("foreground", &self.is_foreground())
            .finish_non_exhaustive()
    }
}

impl MessageChannel {
    /// Creates a channel bound to `manager`'s connection.
    #[must_use]
    pub fn new(
        manager: ConnectionManager,
        transport: Arc<dyn Transport>,
        simulator: SimulatorConfig,
        bus: EventBus,
    ) -> Self {
        let ledger = StatusLedger::default();
        Self {
            inner: Arc::new(ChannelInner {
                manager,
                transport,
                simulator: DegradedModeSimulator::new(simulator, ledger.clone(), bus.clone()),
                ledger,
                bus,
                foreground: AtomicBool::new(true),
            }),
        }
    }

    /// The simulator backing degraded sends.
    #[inline]
    #[must_use]
    pub fn simulator(&self) -> &DegradedModeSimulator {
        &self.inner.simulator
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Sends a message and returns its id.
    ///
    /// Connected sends return the relay-issued id. Everything else returns a
    /// `mock-` id. Only degraded sends are simulated; a send with no relay
    /// session and no degraded fallback is recorded as
    /// [`MessageStatus::Failed`] and never reaches the relay.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if any argument is empty or whitespace. Nothing
    /// is sent in that case.
    pub async fn send(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<MessageId> {
        let sender_id = UserId::new(require("sender_id", sender_id)?);
        let receiver_id = UserId::new(require("receiver_id", receiver_id)?);
        require("content", content)?;

        let snapshot = self.inner.manager.state();
        if snapshot.is_connected() {
            match self
                .send_remote(sender_id.clone(), receiver_id.clone(), content)
                .await
            {
                Ok(message_id) => return Ok(message_id),
                Err(e) => {
                    let failure = Error::send_rpc_failure(e.to_string());
                    warn!(error = %failure, "Relay send failed");
                    let snapshot = self.inner.manager.degrade(&failure.to_string()).await;
                    if !snapshot.degraded {
                        return Ok(self.send_failed());
                    }
                }
            }
        } else if !snapshot.degraded {
            warn!(state = %snapshot.state, "No relay session, message not sent");
            return Ok(self.send_failed());
        }

        Ok(self.send_simulated(sender_id, receiver_id, content))
    }

    async fn send_remote(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<MessageId> {
        let result = self
            .inner
            .transport
            .invoke(Method::SendMessage {
                sender_id,
                receiver_id,
                content: content.to_string(),
            })
            .await?;

        let message_id = issued_id(&result)?;
        debug!(%message_id, "Message sent");
        self.record(&message_id, MessageStatus::Sent);
        Ok(message_id)
    }

    fn send_simulated(&self, sender_id: UserId, receiver_id: UserId, content: &str) -> MessageId {
        let simulator = &self.inner.simulator;
        let message = Message::new(
            simulator.synthesize_id(),
            sender_id,
            receiver_id,
            content,
            MessageStatus::Sent,
        );

        self.record(&message.id, MessageStatus::Sent);
        simulator.simulate_send(self.inner.manager.timers(), &message);
        message.id
    }

    /// Records an undeliverable send. No delivery or reply is simulated.
    fn send_failed(&self) -> MessageId {
        let message_id = self.inner.simulator.synthesize_id();
        self.record(&message_id, MessageStatus::Failed);
        message_id
    }

    // ========================================================================
    // Acknowledge
    // ========================================================================

    /// Marks a message delivered or read.
    ///
    /// Only reaches the relay while connected; relay failures are logged and
    /// absorbed. The local status advances either way.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `message_id` is empty.
    pub async fn acknowledge(&self, message_id: &str, kind: AckKind) -> Result<()> {
        let message_id = MessageId::new(require("message_id", message_id)?);

        if self.inner.manager.state().is_connected() {
            let method = match kind {
                AckKind::Delivered => Method::MarkDelivered {
                    message_id: message_id.clone(),
                },
                AckKind::Read => Method::MarkRead {
                    message_id: message_id.clone(),
                },
            };

            if let Err(e) = self.inner.transport.invoke(method).await {
                warn!(%message_id, ?kind, error = %e, "Acknowledgment failed");
            }
        } else {
            self.inner.simulator.acknowledge(&message_id, kind);
        }

        self.record(&message_id, kind.into());
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Applies a relay event. Presence events are not handled here.
    pub fn handle_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::MessageReceived(message) => self.receive(message),
            RelayEvent::MessageStatusChanged { message_id, status } => {
                self.record(&message_id, status);
            }
            RelayEvent::PresenceChanged { .. } | RelayEvent::Unknown { .. } => {}
        }
    }

    fn receive(&self, message: Message) {
        let message_id = message.id.clone();

        let channel = self.clone();
        let ack_id = message_id.clone();
        self.inner.manager.timers().spawn(async move {
            if let Err(e) = channel.acknowledge(ack_id.as_str(), AckKind::Delivered).await {
                warn!(message_id = %ack_id, error = %e, "Delivery acknowledgment skipped");
            }
        });

        self.inner.ledger.advance(&message_id, message.status);
        debug!(%message_id, sender_id = %message.sender_id, "Message received");

        let notification = (!self.is_foreground()).then(|| ClientEvent::Notification {
            sender_id: message.sender_id.clone(),
            message_id,
            preview: preview(&message.content),
        });

        self.inner.bus.publish(ClientEvent::MessageReceived {
            message,
            simulated: false,
        });

        if let Some(notification) = notification {
            self.inner.bus.publish(notification);
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Latest known status of a message, if the channel has seen it.
    #[must_use]
    pub fn status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.inner.ledger.get(message_id)
    }

    /// Tells the channel whether the host app is in the foreground.
    ///
    /// Messages received in the background also raise a notification.
    pub fn set_foreground(&self, foreground: bool) {
        self.inner.foreground.store(foreground, Ordering::Relaxed);
    }

    /// Returns `true` if the host app is in the foreground.
    #[inline]
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.inner.foreground.load(Ordering::Relaxed)
    }

    /// Forgets every recorded status.
    pub fn clear(&self) {
        self.inner.ledger.clear();
    }

    /// Advances the ledger and publishes the change if there was one.
    fn record(&self, message_id: &MessageId, status: MessageStatus) {
        if self.inner.ledger.advance(message_id, status) {
            self.inner.bus.publish(ClientEvent::MessageStatusChanged {
                message_id: message_id.clone(),
                status,
            });
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Trims `value` and rejects it if nothing is left.
fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(trimmed)
}

/// Extracts the message id from a `chat.sendMessage` result.
fn issued_id(result: &Value) -> Result<MessageId> {
    let id = match result {
        Value::String(id) => Some(id.as_str()),
        Value::Object(fields) => fields.get("id").and_then(Value::as_str),
        _ => None,
    };

    id.filter(|id| !id.is_empty())
        .map(MessageId::new)
        .ok_or_else(|| Error::protocol("send result carries no message id"))
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

// ============================================================================
// Tests
// ============================================================================
