//! Error types for the session core
//!
//! [`TransportError`] is what a radio transport reports. It never leaves the
//! session controller: background faults are folded into a
//! [`ConnectionOutcome`](crate::ConnectionOutcome), an error-stream string
//! built from [`SessionError`], or a boolean.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Faults raised by a radio transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Missing radio permission")]
    Unauthorized,

    #[error("Radio is disabled or no adapter is present")]
    Unavailable,

    #[error("No reachable peer at {address}")]
    Unreachable { address: String },

    #[error("Failed to open listening socket: {0}")]
    ListenFailed(String),

    #[error("Failed to accept connection: {0}")]
    AcceptFailed(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Handle already closed")]
    Closed,

    #[error("Operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Error taxonomy surfaced by the session controller
///
/// The `Display` text is what observers see on the error stream or inside a
/// failed connection outcome.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Authorization(String),

    #[error("Bluetooth is unavailable: {0}")]
    TransportUnavailable(String),

    #[error("{0}")]
    ConnectFailure(String),

    #[error("Stream fault: {0}")]
    StreamFault(#[from] StreamFault),

    #[error("Session has been released")]
    Released,
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized => {
                SessionError::Authorization("Permission required for Bluetooth.".to_string())
            }
            TransportError::Unavailable => SessionError::TransportUnavailable(err.to_string()),
            other => SessionError::ConnectFailure(other.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Stream Faults
// ----------------------------------------------------------------------------

/// Why an inbound message sequence ended abnormally
#[derive(Debug, Error)]
pub enum StreamFault {
    #[error("Stream closed by remote peer")]
    ClosedByPeer,

    #[error("Failed to read from input stream: {0}")]
    Read(#[source] std::io::Error),
}
