//! Client tuning.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use relay_messaging::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_max_retries(5)
//!     .with_connect_timeout(Duration::from_secs(5));
//!
//! assert_eq!(options.max_retries, 5);
//! ```
//!
//! # Environment
//!
//! [`ClientOptions::from_env`] starts from the defaults and overrides any
//! field whose variable is set and parses:
//!
//! | Variable | Field | Unit |
//! |----------|-------|------|
//! | `RELAY_THROTTLE_SECS` | `throttle_interval` | seconds |
//! | `RELAY_CONNECT_TIMEOUT_SECS` | `connect_timeout` | seconds |
//! | `RELAY_MAX_RETRIES` | `max_retries` | count |
//! | `RELAY_BACKOFF_STEP_MS` | `backoff_step` | milliseconds |
//! | `RELAY_SIMULATED_DELIVERY_MS` | `simulated_delivery_delay` | milliseconds |
//! | `RELAY_SIMULATED_REPLY_MS` | `simulated_reply_delay` | milliseconds |
//! | `RELAY_EVENT_CAPACITY` | `event_capacity` | events |
//! | `RELAY_REQUEST_TIMEOUT_SECS` | `ws.request_timeout` | seconds |

// ============================================================================
// Imports
// ============================================================================

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::session::manager::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_THROTTLE_INTERVAL};
use crate::session::simulator::{DEFAULT_DELIVERY_DELAY, DEFAULT_REPLY_DELAY};
use crate::session::{ConnectionConfig, RetryPolicy, SimulatorConfig};
use crate::transport::WsOptions;

// ============================================================================
// ClientOptions
// ============================================================================

/// Timings and limits of a messaging client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Window in which repeated connects fold into one attempt.
    pub throttle_interval: Duration,

    /// Handshake timeout.
    pub connect_timeout: Duration,

    /// Failed handshakes before falling back to degraded mode.
    pub max_retries: u32,

    /// Backoff grows by this step per failed handshake.
    pub backoff_step: Duration,

    /// Delay before a simulated send is marked delivered.
    pub simulated_delivery_delay: Duration,

    /// Delay before a simulated send gets its canned reply.
    pub simulated_reply_delay: Duration,

    /// Events buffered per subscriber.
    pub event_capacity: usize,

    /// Settings of the default WebSocket transport.
    pub ws: WsOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: retry.max_retries,
            backoff_step: retry.backoff_step,
            simulated_delivery_delay: DEFAULT_DELIVERY_DELAY,
            simulated_reply_delay: DEFAULT_REPLY_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ws: WsOptions::default(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from `RELAY_*` environment variables.
    ///
    /// Unset variables keep their default; unparsable ones are logged and
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates options reading overrides through `lookup`.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| {
            parse_var(&lookup, key).map_or(default, Duration::from_secs)
        };
        let millis = |key: &str, default: Duration| {
            parse_var(&lookup, key).map_or(default, Duration::from_millis)
        };

        let request_timeout = secs("RELAY_REQUEST_TIMEOUT_SECS", defaults.ws.request_timeout);

        Self {
            throttle_interval: secs("RELAY_THROTTLE_SECS", defaults.throttle_interval),
            connect_timeout: secs("RELAY_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            max_retries: parse_var(&lookup, "RELAY_MAX_RETRIES").unwrap_or(defaults.max_retries),
            backoff_step: millis("RELAY_BACKOFF_STEP_MS", defaults.backoff_step),
            simulated_delivery_delay: millis(
                "RELAY_SIMULATED_DELIVERY_MS",
                defaults.simulated_delivery_delay,
            ),
            simulated_reply_delay: millis(
                "RELAY_SIMULATED_REPLY_MS",
                defaults.simulated_reply_delay,
            ),
            event_capacity: parse_var(&lookup, "RELAY_EVENT_CAPACITY")
                .unwrap_or(defaults.event_capacity),
            ws: defaults.ws.with_request_timeout(request_timeout),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the connect throttle window.
    #[inline]
    #[must_use]
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the number of failed handshakes tolerated.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff step.
    #[inline]
    #[must_use]
    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// Sets both simulated relay delays.
    #[inline]
    #[must_use]
    pub fn with_simulated_delays(mut self, delivery: Duration, reply: Duration) -> Self {
        self.simulated_delivery_delay = delivery;
        self.simulated_reply_delay = reply;
        self
    }

    /// Sets the per-subscriber event buffer.
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Replaces the WebSocket transport settings.
    #[inline]
    #[must_use]
    pub fn with_ws(mut self, ws: WsOptions) -> Self {
        self.ws = ws;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Settings for the connection manager.
    #[must_use]
    pub fn connection_config(&self, url: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            url: url.into(),
            throttle_interval: self.throttle_interval,
            connect_timeout: self.connect_timeout,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff_step: self.backoff_step,
            },
        }
    }

    /// Settings for the degraded-mode simulator.
    #[must_use]
    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            delivery_delay: self.simulated_delivery_delay,
            reply_delay: self.simulated_reply_delay,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.throttle_interval, Duration::from_secs(10));
        assert_eq!(options.connect_timeout, Duration::from_secs(15));
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.backoff_step, Duration::from_secs(2));
        assert_eq!(options.simulated_delivery_delay, Duration::from_secs(1));
        assert_eq!(options.simulated_reply_delay, Duration::from_secs(3));
        assert_eq!(options.event_capacity, 256);
    }

    #[test]
    fn test_builder_methods() {
        let options = ClientOptions::new()
            .with_throttle_interval(Duration::from_secs(1))
            .with_max_retries(7)
            .with_simulated_delays(Duration::ZERO, Duration::from_millis(10));

        assert_eq!(options.throttle_interval, Duration::from_secs(1));
        assert_eq!(options.max_retries, 7);
        assert_eq!(options.simulated_reply_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_lookup_overrides() {
        let options = ClientOptions::from_lookup(lookup(&[
            ("RELAY_THROTTLE_SECS", "5"),
            ("RELAY_MAX_RETRIES", " 4 "),
            ("RELAY_BACKOFF_STEP_MS", "250"),
            ("RELAY_REQUEST_TIMEOUT_SECS", "9"),
        ]));

        assert_eq!(options.throttle_interval, Duration::from_secs(5));
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.backoff_step, Duration::from_millis(250));
        assert_eq!(options.ws.request_timeout, Duration::from_secs(9));
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let options = ClientOptions::from_lookup(lookup(&[("RELAY_MAX_RETRIES", "many")]));
        assert_eq!(options.max_retries, 3);
    }

    #[test]
    fn test_connection_config() {
        let config = ClientOptions::new()
            .with_max_retries(2)
            .connection_config("ws://relay");

        assert_eq!(config.url, "ws://relay");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.backoff(2), Duration::from_secs(4));
    }
}
