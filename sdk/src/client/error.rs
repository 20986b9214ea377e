//! Errors returned by the REST client.

use reqwest::StatusCode;

/// REST client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never got an HTTP answer.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// No answer within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Wrong user name or password, or a token the server no longer accepts.
    #[error("not authorized for {0}")]
    Unauthorized(String),

    /// The auction, user or route does not exist.
    #[error("nothing at {0}")]
    NotFound(String),

    /// Too many requests; the server may say when to come back.
    #[error("rate limited{}", .retry_after.map(|secs| format!(", retry after {}s", secs)).unwrap_or_default())]
    RateLimited {
        /// Seconds from the `Retry-After` header.
        retry_after: Option<u64>,
    },

    /// Any other non-success status.
    #[error("{path} answered {status}: {message}")]
    Server {
        /// Endpoint path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// `message` from the error body, or the raw body.
        message: String,
    },

    /// The body did not have the expected shape.
    #[error("unexpected response from {path}: {reason}")]
    Decode {
        /// Endpoint path.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// Login succeeded but no token was issued.
    #[error("login response did not include a token")]
    MissingToken,

    /// The client settings are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Maps a non-success status on `path` to an error.
    pub(crate) fn from_status(path: &str, status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(path.to_string()),
            StatusCode::NOT_FOUND => Self::NotFound(path.to_string()),
            _ => Self::Server {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Returns true for failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}
