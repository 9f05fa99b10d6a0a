//! Connection result protocol

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reason reported when an established connection dies underneath us
pub const CONNECTION_LOST: &str = "Connection lost";

/// Reason reported when an outbound connect fails mid-handshake
pub const CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// Result of one connect or listen attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionOutcome {
    /// A duplex stream is up and inbound forwarding has started
    Established,
    /// The attempt (or the connection it produced) failed
    Failed { reason: String },
}

impl ConnectionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ConnectionOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, ConnectionOutcome::Established)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ConnectionOutcome::Established => None,
            ConnectionOutcome::Failed { reason } => Some(reason),
        }
    }
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionOutcome::Established => write!(f, "established"),
            ConnectionOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}
