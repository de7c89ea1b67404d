//! Streaming engine configuration.

use std::time::Duration;

use crate::reconnect::BackoffConfig;

/// Configuration for a [`StreamClient`](crate::client::StreamClient).
///
/// All knobs are plain values with documented defaults; chain the setters to
/// override them and call [`validate`](StreamConfig::validate) (the client
/// does this on construction).
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Backend base URL.
    pub base_url: String,
    /// Path prefix prepended to every backend endpoint.
    pub api_prefix: String,
    /// Timeout for opening the stream (request sent, response headers back).
    pub connect_timeout: Duration,

    /// Whether transport failures trigger the backoff loop.
    pub auto_reconnect: bool,
    /// Delay before the first reconnection attempt; doubled per attempt.
    pub reconnect_base_delay: Duration,
    /// Number of reconnection attempts before the session is abandoned.
    pub reconnect_max_attempts: u32,
    /// Optional ceiling on a single backoff delay (None = uncapped).
    pub reconnect_max_delay: Option<Duration>,
    /// Random jitter factor (0.0–1.0) applied to backoff delays.
    pub reconnect_jitter: f64,

    /// Whether the heartbeat monitor runs while connected.
    pub heartbeat_enabled: bool,
    /// Interval between heartbeat checks.
    pub heartbeat_interval: Duration,
    /// Silence after which the backend is probed.
    pub idle_timeout: Duration,
    /// Maximum wait for a liveness probe.
    pub probe_timeout: Duration,

    /// User id sent when a request carries none.
    pub default_user_id: String,
    /// Capacity of the facade → driver command channel.
    pub command_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/juben".to_string(),
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_attempts: 3,
            reconnect_max_delay: None,
            reconnect_jitter: 0.0,
            heartbeat_enabled: true,
            heartbeat_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            default_user_id: "demo_user".to_string(),
            command_channel_capacity: 16,
        }
    }
}

impl StreamConfig {
    /// Create a configuration pointing at the given backend.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the endpoint path prefix.
    #[must_use]
    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the base reconnection delay.
    #[must_use]
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the reconnection attempt budget.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Cap individual backoff delays.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Enable or disable the heartbeat monitor.
    #[must_use]
    pub fn heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = enabled;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the liveness probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the fallback user id.
    #[must_use]
    pub fn default_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.default_user_id = user_id.into();
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            jitter: self.reconnect_jitter,
        }
    }

    /// Full URL for an endpoint path below the prefix.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix,
            path
        )
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err("API prefix must start with '/'".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        self.backoff().validate()?;
        if self.heartbeat_enabled {
            if self.heartbeat_interval.is_zero() {
                return Err("Heartbeat interval must be > 0".to_string());
            }
            if self.idle_timeout.is_zero() {
                return Err("Idle timeout must be > 0".to_string());
            }
            if self.probe_timeout.is_zero() {
                return Err("Probe timeout must be > 0".to_string());
            }
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
