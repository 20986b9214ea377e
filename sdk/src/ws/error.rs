//! WebSocket error types.
//!
//! Provides error types for the notification client. None of these are
//! returned from the synchronous socket API; they describe why a session
//! attempt failed and are surfaced through logs and session events.

use std::fmt;

/// WebSocket errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    /// Connection failed.
    Connection(String),

    /// WebSocket protocol error.
    Protocol(String),

    /// Malformed STOMP frame.
    Frame(String),

    /// Failed to serialize message.
    Serialization(String),

    /// Failed to deserialize message.
    Deserialization(String),

    /// Server sent a STOMP ERROR frame.
    Server {
        /// Value of the `message` header.
        message: String,
        /// Frame body, usually a longer description.
        details: String,
    },

    /// Not connected.
    NotConnected,

    /// Connection closed.
    Closed,

    /// The server did not answer CONNECT in time.
    HandshakeTimeout,

    /// Invalid configuration.
    InvalidConfig(String),

    /// Send failed.
    SendFailed(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection failed: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Frame(msg) => write!(f, "malformed frame: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            Self::Deserialization(msg) => write!(f, "deserialization failed: {}", msg),
            Self::Server { message, details } => {
                if details.is_empty() {
                    write!(f, "server error: {}", message)
                } else {
                    write!(f, "server error: {} ({})", message, details)
                }
            }
            Self::NotConnected => write!(f, "not connected"),
            Self::Closed => write!(f, "connection closed"),
            Self::HandshakeTimeout => write!(f, "timed out waiting for CONNECTED"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::SendFailed(msg) => write!(f, "send failed: {}", msg),
        }
    }
}

impl std::error::Error for WsError {}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;

        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => Self::Closed,
            Error::Io(e) => Self::Connection(e.to_string()),
            Error::Http(response) => {
                Self::Connection(format!("handshake rejected with {}", response.status()))
            }
            other => Self::Protocol(other.to_string()),
        }
    }
}
