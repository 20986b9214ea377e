//! Watcher configuration.
//!
//! Provides configuration options for the watcher, loaded from `GAVEL_*`
//! environment variables.

use std::env;
use std::time::Duration;

use gavel_sdk::client::ClientConfig;
use gavel_sdk::ws::WsConfig;
use gavel_sdk::AuctionId;
use serde::{Deserialize, Serialize};

/// Default notification socket URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws-auction/websocket";

/// Default REST API URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// How the watcher authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// An already issued token.
    Token(String),
    /// User name and password exchanged for a token at startup.
    Password {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// No login; only public topics are followed.
    Anonymous,
}

/// Configuration for the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Notification socket URL.
    pub ws_url: String,

    /// REST API URL.
    pub api_url: String,

    /// Issued token. Takes precedence over user and password.
    pub token: Option<String>,

    /// User name for password login.
    pub user: Option<String>,

    /// Password for password login.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Auctions to follow, as given by the operator.
    pub auctions: Vec<String>,

    /// Whether to also follow every open auction listed by the API.
    pub watch_open: bool,

    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Heartbeat interval in milliseconds, both directions. Zero disables.
    pub heartbeat_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            user: None,
            password: None,
            auctions: Vec::new(),
            watch_open: false,
            reconnect_delay_ms: 5_000,
            heartbeat_ms: 10_000,
        }
    }
}

impl WatcherConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration from `lookup`, using defaults for absent keys.
    ///
    /// Recognized keys: `GAVEL_WS_URL`, `GAVEL_API_URL`, `GAVEL_TOKEN`,
    /// `GAVEL_USER`, `GAVEL_PASSWORD`, `GAVEL_AUCTIONS` (comma-separated),
    /// `GAVEL_WATCH_OPEN`, `GAVEL_RECONNECT_DELAY_MS`, `GAVEL_HEARTBEAT_MS`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            ws_url: get("GAVEL_WS_URL").unwrap_or(defaults.ws_url),
            api_url: get("GAVEL_API_URL").unwrap_or(defaults.api_url),
            token: get("GAVEL_TOKEN"),
            user: get("GAVEL_USER"),
            password: get("GAVEL_PASSWORD"),
            auctions: get("GAVEL_AUCTIONS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            watch_open: match get("GAVEL_WATCH_OPEN") {
                Some(value) => parse_flag("GAVEL_WATCH_OPEN", &value)?,
                None => defaults.watch_open,
            },
            reconnect_delay_ms: match get("GAVEL_RECONNECT_DELAY_MS") {
                Some(value) => parse_number("GAVEL_RECONNECT_DELAY_MS", &value)?,
                None => defaults.reconnect_delay_ms,
            },
            heartbeat_ms: match get("GAVEL_HEARTBEAT_MS") {
                Some(value) => parse_number("GAVEL_HEARTBEAT_MS", &value)?,
                None => defaults.heartbeat_ms,
            },
        })
    }

    /// Sets the auctions to follow.
    #[must_use]
    pub fn with_auctions(mut self, auctions: Vec<String>) -> Self {
        self.auctions = auctions;
        self
    }

    /// Sets the token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidUrl(self.ws_url.clone()));
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }

        if self.token.is_none() && self.user.is_some() != self.password.is_some() {
            return Err(ConfigError::IncompleteCredentials);
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidReconnectDelay);
        }

        self.parse_auctions().map(|_| ())
    }

    /// Returns how the watcher should authenticate.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        if let Some(token) = &self.token {
            return Credentials::Token(token.clone());
        }
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Credentials::Password {
                user: user.clone(),
                password: password.clone(),
            },
            _ => Credentials::Anonymous,
        }
    }

    /// Parses the configured auction ids.
    ///
    /// # Errors
    ///
    /// Returns an error for the first id that is not a real auction id.
    pub fn parse_auctions(&self) -> Result<Vec<AuctionId>, ConfigError> {
        self.auctions
            .iter()
            .map(|raw| {
                AuctionId::parse(Some(raw.as_str()))
                    .ok_or_else(|| ConfigError::InvalidAuctionId(raw.clone()))
            })
            .collect()
    }

    /// Builds the socket configuration.
    #[must_use]
    pub fn ws_config(&self) -> WsConfig {
        let heartbeat = Duration::from_millis(self.heartbeat_ms);
        WsConfig::new(self.ws_url.clone())
            .with_heartbeat(heartbeat, heartbeat)
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
    }

    /// Builds the REST client configuration.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.api_url.clone())
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// URL with the wrong scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Only one of user and password was given.
    #[error("GAVEL_USER and GAVEL_PASSWORD must be set together")]
    IncompleteCredentials,

    /// Invalid reconnect delay.
    #[error("reconnect_delay_ms must be > 0")]
    InvalidReconnectDelay,

    /// Invalid auction id.
    #[error("invalid auction id: {0}")]
    InvalidAuctionId(String),

    /// Unparseable environment value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}
