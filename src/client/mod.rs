//! Messaging client: the public entry point.
//!
//! [`MessagingClient`] composes one [`ConnectionManager`], one
//! [`MessageChannel`] and one [`PresenceTracker`] over a shared
//! [`Transport`], and routes transport events to them.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MessagingClient`] | Connect, send, acknowledge, presence, events |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Timings and limits |
//!
//! # Example
//!
//! ```no_run
//! use relay_messaging::{ClientEvent, MessagingClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = MessagingClient::builder()
//!     .relay_url("wss://relay.example.com/hubs/chat")
//!     .build()?;
//! let mut events = client.subscribe();
//!
//! client.connect("access-token").await;
//! let id = client.send("consumer-1", "provider-9", "Is Tuesday ok?").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::MessageStatusChanged { message_id, status } = event
//!         && message_id == id
//!     {
//!         println!("{message_id} is now {status}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Client timings and limits.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use options::ClientOptions;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::identifiers::{MessageId, UserId};
use crate::message::{AckKind, MessageStatus};
use crate::protocol::RelayEvent;
use crate::session::{
    ConnectionManager, ConnectionSnapshot, MessageChannel, PresenceTracker,
};
use crate::transport::{Credentials, EventHandler, Transport, TransportEvent};

// ============================================================================
// MessagingClient
// ============================================================================

/// Real-time messaging client for one user session.
///
/// Dropping the client detaches it from the transport.
pub struct MessagingClient {
    manager: ConnectionManager,
    channel: MessageChannel,
    presence: Arc<PresenceTracker>,
    bus: EventBus,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient")
            .field("manager", &self.manager)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl MessagingClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(url: String, options: &ClientOptions, transport: Arc<dyn Transport>) -> Self {
        let bus = EventBus::new(options.event_capacity);
        let manager = ConnectionManager::new(
            options.connection_config(url),
            Arc::clone(&transport),
            bus.clone(),
        );
        let channel = MessageChannel::new(
            manager.clone(),
            Arc::clone(&transport),
            options.simulator_config(),
            bus.clone(),
        );
        let presence = Arc::new(PresenceTracker::new(bus.clone()));

        transport.set_event_handler(Self::router(&manager, &channel, &presence));

        Self {
            manager,
            channel,
            presence,
            bus,
            transport,
        }
    }

    /// Routes transport events to the component that owns them.
    fn router(
        manager: &ConnectionManager,
        channel: &MessageChannel,
        presence: &Arc<PresenceTracker>,
    ) -> EventHandler {
        let manager = manager.clone();
        let channel = channel.clone();
        let presence = Arc::clone(presence);

        Arc::new(move |event: TransportEvent| match event {
            TransportEvent::Relay(RelayEvent::PresenceChanged { user_id, status }) => {
                presence.handle_status(user_id, &status);
            }
            TransportEvent::Relay(RelayEvent::Unknown { method, .. }) => {
                debug!(%method, "Ignoring unknown relay event");
            }
            TransportEvent::Relay(relay) => channel.handle_relay_event(relay),
            lifecycle => manager.handle_transport_event(&lifecycle),
        })
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connects with `access_token`. Never fails; see the returned state.
    pub async fn connect(&self, access_token: &str) -> ConnectionSnapshot {
        self.manager.connect(&Credentials::token(access_token)).await
    }

    /// Disconnects and cancels all scheduled work.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
        self.presence.clear();
    }

    /// Restarts the session, clearing degraded mode and local state.
    pub async fn reset(&self) {
        self.manager.reset().await;
        self.presence.clear();
        self.channel.clear();
    }

    /// Current connection snapshot.
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> ConnectionSnapshot {
        self.manager.state()
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Sends a message. Returns a relay id, or a `mock-` id when the relay
    /// was not reached.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`](crate::Error::Validation) for empty arguments.
    pub async fn send(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<MessageId> {
        self.channel.send(sender_id, receiver_id, content).await
    }

    /// Marks a message delivered or read.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`](crate::Error::Validation) for an empty id.
    pub async fn acknowledge(&self, message_id: &str, kind: AckKind) -> Result<()> {
        self.channel.acknowledge(message_id, kind).await
    }

    /// Latest known status of a message.
    #[must_use]
    pub fn message_status(&self, message_id: &str) -> Option<MessageStatus> {
        self.channel.status(&MessageId::from(message_id))
    }

    /// Tells the client whether the host app is in the foreground.
    pub fn set_foreground(&self, foreground: bool) {
        self.channel.set_foreground(foreground);
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Returns `true` if `user_id` is online.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(&UserId::from(user_id))
    }

    /// Counterparts currently online.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribes to every future client event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.transport.clear_event_handler();
    }
}

// ============================================================================
// Tests
// ============================================================================
