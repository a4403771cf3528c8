//! Error types for the devlink client.
//!
//! Every transport and codec failure surfaces to the immediate caller as a
//! typed `LinkError`. Callers that only need to render a diagnostic can use
//! [`LinkError::kind`] plus the `Display` message.

use std::time::Duration;
use thiserror::Error;

/// Windows `ERROR_BROKEN_PIPE`.
const OS_ERROR_BROKEN_PIPE: i32 = 109;
/// Windows `ERROR_NO_DATA` (pipe is being closed).
const OS_ERROR_NO_DATA: i32 = 232;
/// Windows `ERROR_PIPE_NOT_CONNECTED`.
const OS_ERROR_PIPE_NOT_CONNECTED: i32 = 233;

/// Main error type for the devlink client.
#[derive(Debug, Error)]
pub enum LinkError {
    // Connection lifecycle
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed {
        endpoint: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by peer")]
    BrokenConnection,

    #[error("Transport I/O error: {message}")]
    TransportIo {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Wire format
    #[error("Failed to decode envelope: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Command flow
    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Service returned {code}: {message}")]
    Service { code: String, message: String },
}

/// Result type alias for devlink operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Coarse classification of a [`LinkError`], stable for display layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectFailed,
    NotConnected,
    BrokenConnection,
    TransportIo,
    Decode,
    FrameTooLarge,
    Timeout,
    Cancelled,
    InvalidPayload,
    Service,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectFailed => "connect_failed",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::BrokenConnection => "broken_connection",
            ErrorKind::TransportIo => "transport_io",
            ErrorKind::Decode => "decode",
            ErrorKind::FrameTooLarge => "frame_too_large",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::Service => "service",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        if is_broken_connection_io(&err) {
            LinkError::BrokenConnection
        } else {
            LinkError::TransportIo {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Decode {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LinkError {
    /// Create a connect error with endpoint context.
    pub fn connect_failed(endpoint: impl std::fmt::Display, err: std::io::Error) -> Self {
        LinkError::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a decode error without an underlying serde error.
    pub fn decode(message: impl Into<String>) -> Self {
        LinkError::Decode {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            LinkError::NotConnected => ErrorKind::NotConnected,
            LinkError::BrokenConnection => ErrorKind::BrokenConnection,
            LinkError::TransportIo { .. } => ErrorKind::TransportIo,
            LinkError::Decode { .. } => ErrorKind::Decode,
            LinkError::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            LinkError::Timeout(_) => ErrorKind::Timeout,
            LinkError::Cancelled => ErrorKind::Cancelled,
            LinkError::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            LinkError::Service { .. } => ErrorKind::Service,
        }
    }

    /// Whether the peer has gone away.
    pub fn is_broken_connection(&self) -> bool {
        matches!(self, LinkError::BrokenConnection)
    }

    /// Check if a read loop may sleep and try again after this error.
    ///
    /// Decode failures only lose the offending frame; plain I/O failures
    /// may clear up. Everything else leaves the stream unusable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::TransportIo { .. } | LinkError::Decode { .. } | LinkError::Timeout(_)
        )
    }
}

/// Check whether an I/O error means the other side closed the stream.
pub(crate) fn is_broken_connection_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind as Io;

    if matches!(
        err.kind(),
        Io::BrokenPipe | Io::ConnectionReset | Io::ConnectionAborted | Io::UnexpectedEof
    ) {
        return true;
    }

    matches!(
        err.raw_os_error(),
        Some(OS_ERROR_BROKEN_PIPE) | Some(OS_ERROR_NO_DATA) | Some(OS_ERROR_PIPE_NOT_CONNECTED)
    ) && cfg!(windows)
}
