//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`MessagingClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use relay_messaging::MessagingClient;
//!
//! # fn example() -> relay_messaging::Result<()> {
//! let client = MessagingClient::builder()
//!     .relay_url("wss://relay.example.com/hubs/chat")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Transport, WsTransport};

use super::MessagingClient;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`MessagingClient`].
///
/// Use [`MessagingClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Relay endpoint.
    relay_url: Option<String>,
    /// Timings and limits.
    options: ClientOptions,
    /// Custom transport; the WebSocket transport is used when unset.
    transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("relay_url", &self.relay_url)
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default options and no relay URL.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder configured from the environment.
    ///
    /// Reads the relay URL from `RELAY_URL` and every other setting through
    /// [`ClientOptions::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            relay_url: std::env::var("RELAY_URL").ok(),
            options: ClientOptions::from_env(),
            transport: None,
        }
    }

    /// Sets the relay endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    /// Replaces all timings and limits.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `transport` instead of the built-in WebSocket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the client with validation.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the relay URL is missing or not `ws`/`wss`
    /// - [`Error::Config`] if a limit is zero
    pub fn build(self) -> Result<MessagingClient> {
        let url = self.validate_url()?;
        self.validate_options()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new(self.options.ws.clone())));

        Ok(MessagingClient::new(url, &self.options, transport))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Validates the relay URL.
    fn validate_url(&self) -> Result<String> {
        let raw = self.relay_url.clone().ok_or_else(|| {
            Error::config(
                "Relay URL is required. Use .relay_url() to set it.\n\
                 Example: MessagingClient::builder().relay_url(\"wss://relay.example.com/hubs/chat\")",
            )
        })?;

        let url = Url::parse(raw.trim())
            .map_err(|e| Error::config(format!("Relay URL {raw:?} is invalid: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Relay URL must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        Ok(url.into())
    }

    /// Validates limits that would make the client unusable.
    fn validate_options(&self) -> Result<()> {
        let options = &self.options;

        if options.max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        if options.event_capacity == 0 {
            return Err(Error::config("event_capacity must be at least 1"));
        }
        if options.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be greater than zero"));
        }
        if options.ws.max_pending == 0 {
            return Err(Error::config("ws.max_pending must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::MockTransport;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ClientBuilder::new();
        assert!(builder.relay_url.is_none());
        assert!(builder.transport.is_none());
        assert_eq!(builder.options, ClientOptions::default());
    }

    #[test]
    fn test_relay_url_sets_url() {
        let builder = ClientBuilder::new().relay_url("ws://localhost:9000/hub");
        assert_eq!(builder.relay_url.as_deref(), Some("ws://localhost:9000/hub"));
    }

    #[test]
    fn test_build_fails_without_url() {
        let err = ClientBuilder::new().build().expect_err("missing url");
        assert!(err.to_string().contains("Relay URL is required"));
    }

    #[test]
    fn test_build_fails_with_http_url() {
        let err = ClientBuilder::new()
            .relay_url("https://relay.example.com")
            .build()
            .expect_err("wrong scheme");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_fails_with_garbage_url() {
        let result = ClientBuilder::new().relay_url("not a url").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_with_zero_retries() {
        let err = ClientBuilder::new()
            .relay_url("ws://localhost/hub")
            .options(ClientOptions::new().with_max_retries(0))
            .build()
            .expect_err("zero retries");
        assert!(err.to_string().contains("max_retries"));
    }

    #[tokio::test]
    async fn test_build_with_custom_transport() {
        let transport = MockTransport::succeeding();
        let client = ClientBuilder::new()
            .relay_url("ws://localhost/hub")
            .transport(transport.clone())
            .build()
            .expect("build");

        assert!(transport.has_handler());
        drop(client);
        assert!(!transport.has_handler());
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = ClientBuilder::new().relay_url("ws://localhost/hub");
        let cloned = builder.clone();
        assert_eq!(builder.relay_url, cloned.relay_url);
    }
}
