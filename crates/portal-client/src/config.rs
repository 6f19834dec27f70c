//! Client configuration.
//!
//! Configuration is read from JSON files of the form:
//!
//! ```json
//! { "url": "wss://rpc.example.com", "reconnect_delay_ms": 5000, "connect_timeout_ms": 10000 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;

/// Default delay before reopening after a failed connection attempt.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Default WebSocket handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default peer URL.
pub const DEFAULT_URL: &str = "wss://localhost";

const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Connection settings for a [`crate::Client`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Peer WebSocket URL.
    pub url: String,
    /// Fixed delay before retrying after `connect_error`, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Handshake timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Reconnect delay as a `Duration`.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Handshake timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ClientError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.is_empty() {
            return Err(ClientError::Config("url cannot be empty".to_string()));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| ClientError::Config(format!("invalid url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::Config(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
