//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default keepalive cadence; detects half-open connections within a minute.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Default deadline for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default lower bound for reconnect backoff.
pub const DEFAULT_RECONNECT_MIN: Duration = Duration::from_secs(1);
/// Default upper bound for reconnect backoff.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(60);
/// Default reconnect backoff multiplier.
pub const DEFAULT_RECONNECT_FACTOR: f64 = 2.0;

/// Configuration for a [`Client`](crate::Client).
///
/// Everything the client could be tempted to read from process-wide state
/// lives here instead, so tests can instantiate independent clients against
/// a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint, `ws://host/websocket` or `wss://host/websocket`.
    pub url: String,
    /// API key presented to `auth.login_with_api_key`.
    pub api_key: String,
    /// Per-call deadline.
    pub call_timeout: Duration,
    /// Deadline for the initial dial and TLS handshake.
    pub connect_timeout: Duration,
    /// Cadence of `core.ping` keepalives; zero disables the keepalive task.
    pub ping_interval: Duration,
    /// Lower bound of the reconnect backoff range.
    pub reconnect_min: Duration,
    /// Upper bound of the reconnect backoff range.
    pub reconnect_max: Duration,
    /// Backoff multiplier applied after each failed reconnect attempt.
    pub reconnect_factor: f64,
    /// Skip TLS certificate verification for `wss://` endpoints.
    pub insecure_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_min: DEFAULT_RECONNECT_MIN,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            reconnect_factor: DEFAULT_RECONNECT_FACTOR,
            insecure_tls: false,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with the given endpoint and API key and
    /// defaults for everything else.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Failures here are permanent ([`ClientError::Config`]); callers must
    /// not retry them.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(ClientError::Config("URL is empty".to_string()));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ClientError::Config(format!(
                "URL must start with ws:// or wss://, got {:?}",
                self.url
            )));
        }
        if self.api_key.is_empty() {
            return Err(ClientError::Config("API key is empty".to_string()));
        }
        if self.reconnect_factor < 1.0 {
            return Err(ClientError::Config(format!(
                "reconnect factor must be >= 1.0, got {}",
                self.reconnect_factor
            )));
        }
        Ok(())
    }

    /// Whether the endpoint uses TLS.
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("wss://")
    }
}
