//! WebSocket configuration.
//!
//! Provides configuration options for the notification client.

use std::time::Duration;

/// Default WebSocket URL (the raw WebSocket path of the SockJS endpoint).
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws-auction/websocket";

/// Default heartbeat interval in milliseconds, both directions.
pub const DEFAULT_HEARTBEAT_MS: u64 = 4_000;

/// Default reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Default handshake timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// WebSocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL.
    pub url: String,

    /// Interval at which the client offers to send heartbeats.
    /// `Duration::ZERO` disables outgoing heartbeats.
    pub heartbeat_outgoing: Duration,

    /// Interval at which the client wants to receive heartbeats.
    /// `Duration::ZERO` disables the silence watchdog.
    pub heartbeat_incoming: Duration,

    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,

    /// Maximum time to wait for the CONNECTED frame.
    pub connect_timeout: Duration,

    /// Maximum consecutive failed attempts (None = unlimited).
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            heartbeat_outgoing: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            heartbeat_incoming: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_reconnect_attempts: None,
        }
    }
}

impl WsConfig {
    /// Creates a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets both heartbeat intervals.
    #[must_use]
    pub fn with_heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    /// Sets the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Returns the connection URL with the credential as `token` parameter.
    ///
    /// JWTs are base64url with dots, so the token is appended unencoded.
    #[must_use]
    pub fn connection_url(&self, credential: Option<&str>) -> String {
        match credential {
            Some(token) => {
                if self.url.contains('?') {
                    format!("{}&token={}", self.url, token)
                } else {
                    format!("{}?token={}", self.url, token)
                }
            }
            None => self.url.clone(),
        }
    }

    /// Returns the `heart-beat` header value offered on CONNECT.
    #[must_use]
    pub fn heartbeat_header(&self) -> String {
        format!(
            "{},{}",
            self.heartbeat_outgoing.as_millis(),
            self.heartbeat_incoming.as_millis()
        )
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), super::error::WsError> {
        if self.url.is_empty() {
            return Err(super::error::WsError::InvalidConfig(
                "url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(super::error::WsError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(super::error::WsError::InvalidConfig(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WsConfig::default();
        assert_eq!(config.url, DEFAULT_WS_URL);
        assert_eq!(config.heartbeat_outgoing, Duration::from_millis(4_000));
        assert_eq!(config.reconnect_delay, Duration::from_millis(5_000));
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::new("wss://example.com/ws-auction/websocket")
            .with_heartbeat(Duration::from_secs(10), Duration::ZERO)
            .with_reconnect_delay(Duration::from_secs(2))
            .with_connect_timeout(Duration::from_secs(3))
            .with_max_reconnect_attempts(5);

        assert_eq!(config.heartbeat_outgoing, Duration::from_secs(10));
        assert_eq!(config.heartbeat_incoming, Duration::ZERO);
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(config.heartbeat_header(), "10000,0");
    }

    #[test]
    fn test_config_connection_url() {
        let config = WsConfig::new("wss://example.com/ws");
        assert_eq!(config.connection_url(None), "wss://example.com/ws");
        assert_eq!(
            config.connection_url(Some("tok1")),
            "wss://example.com/ws?token=tok1"
        );

        let config = WsConfig::new("wss://example.com/ws?v=2");
        assert_eq!(
            config.connection_url(Some("tok1")),
            "wss://example.com/ws?v=2&token=tok1"
        );
    }

    #[test]
    fn test_config_validate() {
        assert!(WsConfig::default().validate().is_ok());
        assert!(WsConfig::new("").validate().is_err());
        assert!(WsConfig::new("https://example.com/ws").validate().is_err());

        let config = WsConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
