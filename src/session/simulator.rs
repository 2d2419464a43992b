//! Local stand-in for the relay.
//!
//! Active once the connection is degraded (and for sends issued while no
//! session is up). A simulated send gets a `mock-` id, is marked delivered
//! after [`SimulatorConfig::delivery_delay`] and answered with a canned
//! reply after [`SimulatorConfig::reply_delay`]. Both timers belong to the
//! manager's [`TimerRegistry`], so a disconnect cancels them.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace};

use crate::events::{ClientEvent, EventBus};
use crate::identifiers::{MessageId, SIMULATED_ID_PREFIX};
use crate::message::{AckKind, Message, MessageStatus, unix_millis};

use super::channel::StatusLedger;
use super::timers::TimerRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Default delay before a simulated send is marked delivered.
pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Default delay before the canned reply arrives.
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_secs(3);

const FALLBACK_REPLY: &str = "Thanks for your message! I'll get back to you shortly.";

/// Keyword rules, checked in order.
const REPLY_RULES: &[(&str, &str)] = &[
    (
        r"(?i)\b(hi|hello|hey|good (morning|afternoon|evening))\b",
        "Hello! Thanks for reaching out. How can I help you today?",
    ),
    (
        r"(?i)\b(price|prices|cost|costs|quote|budget|how much)\b",
        "I'll prepare a quote for you. Could you share a few more details about the job?",
    ),
    (
        r"(?i)\b(order|orders|booking)\b",
        "I've received your order details and will confirm shortly.",
    ),
    (
        r"(?i)\b(contract|agreement|sign)\b",
        "I'll review the contract terms and get back to you today.",
    ),
    (
        r"(?i)\b(deliver|delivery|shipping|ship|eta)\b",
        "Delivery usually takes 2 to 3 business days. I'll send tracking details once it's on the way.",
    ),
    (
        r"(?i)\b(thanks|thank you|thx|cheers)\b",
        "You're welcome! Let me know if there's anything else.",
    ),
];

static REPLY_MATCHERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    REPLY_RULES
        .iter()
        .filter_map(|(pattern, reply)| Regex::new(pattern).ok().map(|regex| (regex, *reply)))
        .collect()
});

/// Picks the canned reply for `content`.
#[must_use]
pub fn auto_reply(content: &str) -> &'static str {
    REPLY_MATCHERS
        .iter()
        .find(|(regex, _)| regex.is_match(content))
        .map_or(FALLBACK_REPLY, |(_, reply)| *reply)
}

// ============================================================================
// SimulatorConfig
// ============================================================================

/// Timings of the simulated relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Delay before a send is marked delivered.
    pub delivery_delay: Duration,
    /// Delay, counted from the send, before the canned reply arrives.
    pub reply_delay: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            delivery_delay: DEFAULT_DELIVERY_DELAY,
            reply_delay: DEFAULT_REPLY_DELAY,
        }
    }
}

// ============================================================================
// DegradedModeSimulator
// ============================================================================

/// Simulated relay used while the real one is unreachable.
#[derive(Debug)]
pub struct DegradedModeSimulator {
    config: SimulatorConfig,
    sequence: AtomicU64,
    ledger: StatusLedger,
    bus: EventBus,
}

impl DegradedModeSimulator {
    pub(crate) fn new(config: SimulatorConfig, ledger: StatusLedger, bus: EventBus) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(0),
            ledger,
            bus,
        }
    }

    /// Timings in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> SimulatorConfig {
        self.config
    }

    /// Returns a fresh `mock-<unix millis>-<seq>` id.
    #[must_use]
    pub fn synthesize_id(&self) -> MessageId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        MessageId::new(format!("{SIMULATED_ID_PREFIX}{}-{seq}", unix_millis()))
    }

    /// Schedules the delivered status and the canned reply for `message`.
    pub fn simulate_send(&self, timers: &Arc<TimerRegistry>, message: &Message) {
        let delivered = {
            let ledger = self.ledger.clone();
            let bus = self.bus.clone();
            let message_id = message.id.clone();
            move || {
                if ledger.advance(&message_id, MessageStatus::Delivered) {
                    bus.publish(ClientEvent::MessageStatusChanged {
                        message_id,
                        status: MessageStatus::Delivered,
                    });
                }
            }
        };
        timers.schedule(self.config.delivery_delay, delivered);

        let reply = Message::new(
            self.synthesize_id(),
            message.receiver_id.clone(),
            message.sender_id.clone(),
            auto_reply(&message.content),
            MessageStatus::Delivered,
        );
        let replied = {
            let ledger = self.ledger.clone();
            let bus = self.bus.clone();
            move || {
                trace!(message_id = %reply.id, "Simulated reply");
                ledger.advance(&reply.id, reply.status);
                bus.publish(ClientEvent::MessageReceived {
                    message: reply,
                    simulated: true,
                });
            }
        };
        timers.schedule(self.config.reply_delay, replied);

        debug!(message_id = %message.id, "Send simulated");
    }

    /// Acknowledgments have no network effect here.
    pub fn acknowledge(&self, message_id: &MessageId, kind: AckKind) {
        trace!(%message_id, ?kind, "Acknowledgment simulated");
    }
}

// ============================================================================
// Tests
// ============================================================================
