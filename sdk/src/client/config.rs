//! REST client settings.

use std::time::Duration;

use super::error::ClientError;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry delays stop doubling after this many attempts.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Settings for [`AuctionClient`](super::AuctionClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, e.g. `https://gavel.example/api`. A trailing slash is
    /// dropped.
    pub base_url: String,

    /// Bearer token issued by login, sent on every request once set.
    pub token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Extra attempts after a timeout, a 5xx or a 429.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each further one.
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates settings for the API at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many times a failed request is retried.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Full URL of an endpoint path such as `/auctions/7`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Delay before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.retry_delay.saturating_mul(1 << shift)
    }

    /// Checks the URL scheme and the token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the base URL is not http(s)
    /// or the token is empty or cannot be sent as a header.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "base url {:?} is not http(s)",
                self.base_url
            )));
        }

        match self.token.as_deref() {
            Some("") => Err(ClientError::InvalidConfig("token is empty".to_string())),
            Some(token) if token.chars().any(char::is_whitespace) => Err(
                ClientError::InvalidConfig("token contains whitespace".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let config = ClientConfig::new("https://gavel.example/api/");
        assert_eq!(config.base_url, "https://gavel.example/api");
        assert_eq!(config.endpoint("/auctions/7"), "https://gavel.example/api/auctions/7");
        assert_eq!(config.endpoint("auth/login"), "https://gavel.example/api/auth/login");
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = ClientConfig::default().with_retry_delay(Duration::from_millis(10));
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(50), Duration::from_millis(640));
    }

    #[test]
    fn test_validate_scheme_and_token() {
        assert!(ClientConfig::default().validate().is_ok());
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("ws://gavel.example").validate().is_err());

        let authed = ClientConfig::new("https://gavel.example").with_token("a.b.c");
        assert!(authed.validate().is_ok());
        assert!(authed.clone().with_token("").validate().is_err());
        assert!(authed.with_token("a.b\nc").validate().is_err());
    }
}
