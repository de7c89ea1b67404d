//! Error handling for the streaming engine.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// The main result type used throughout the streaming engine.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for every fallible streaming operation.
#[derive(Error, Debug)]
pub enum StreamError {
    /// HTTP request errors (wraps `reqwest::Error`)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend answered with a non-2xx status
    #[error("API error: status={status}, body={body}")]
    Api {
        status: http::StatusCode,
        body: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The transport was closed underneath us.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason given"))]
    ConnectionClosed { reason: Option<String> },

    /// The byte stream ended before a terminal event arrived.
    #[error("Stream ended before completion")]
    StreamEnded,

    /// A connection state change that the state machine does not allow.
    #[error("Invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// `start` was called while a connection for the session is still live.
    #[error("Session {session_id} already has an active connection")]
    SessionBusy { session_id: String },

    /// The liveness probe reported an unhealthy backend.
    #[error("Liveness probe failed: {message}")]
    Probe { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StreamError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an API error.
    pub fn api(status: http::StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create a probe failure.
    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }

    /// Create a busy-session error.
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        Self::SessionBusy {
            session_id: session_id.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for failures the reconnect loop absorbs.
    ///
    /// Transport-level problems (refused connections, dropped streams,
    /// non-2xx responses, timeouts) are recoverable by reconnecting.
    /// Misconfiguration and state-machine violations are not.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Api { .. }
                | Self::Timeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::StreamEnded
                | Self::Probe { .. }
        )
    }
}
