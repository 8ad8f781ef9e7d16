use std::time::Duration;

use swap_common::SecurityCaps;

/// Runtime configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay's signaling endpoint, including the
    /// `/3gpp-swap/v1` path.
    pub url: String,
    /// Prefix for the generated source identifier.
    pub source_id_prefix: String,
    /// How long a request waits for its correlated response.
    pub request_timeout: Duration,
    /// Transport-level connect timeout.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
    /// Hop-by-hop security settings.
    pub security: SecurityConfig,
}

impl ClientConfig {
    /// Builds a configuration with defaults for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:8080{}", swap_common::types::SIGNALING_PATH),
            source_id_prefix: "client".to_string(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Attempts before the runtime gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_attempts: 10,
        }
    }
}

/// Hop-by-hop security settings.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Whether the envelope is used at all.
    pub enabled: bool,
    /// Shared secret for key derivation.
    pub shared_secret: Option<String>,
    /// Advertise and apply HMAC signing.
    pub integrity: bool,
    /// Advertise and apply AES-GCM payload encryption.
    pub encryption: bool,
}

impl SecurityConfig {
    /// The capabilities to advertise and apply; empty when disabled.
    #[must_use]
    pub fn caps(&self) -> SecurityCaps {
        if self.enabled {
            SecurityCaps {
                integrity: self.integrity,
                encryption: self.encryption,
            }
        } else {
            SecurityCaps::default()
        }
    }
}
