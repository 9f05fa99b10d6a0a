//! Session configuration

use std::time::Duration;

use uuid::Uuid;

/// Serial port profile UUID shared by both ends of a chat connection
pub const SERIAL_PORT_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a [`SessionController`](crate::SessionController)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Service record name advertised while listening
    pub service_name: String,
    /// Well-known service identifier used by both listen and connect
    pub service_uuid: Uuid,
    /// Size of the buffer handed to each stream read
    pub read_buffer_size: usize,
    /// Upper bound on a blocking outbound connect; `None` waits forever
    pub connect_timeout: Option<Duration>,
    /// Sender label attached to locally sent messages
    pub local_sender_label: String,
    /// Sender label used when the remote device has no name
    pub fallback_sender_label: String,
    /// Capacity of the error, message and outcome broadcast channels
    pub event_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_name: "chat_service".to_string(),
            service_uuid: SERIAL_PORT_SERVICE_UUID,
            read_buffer_size: 1024,
            connect_timeout: Some(Duration::from_secs(15)),
            local_sender_label: "Me".to_string(),
            fallback_sender_label: "Unknown device".to_string(),
            event_buffer_size: 64,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, name: impl Into<String>, uuid: Uuid) -> Self {
        self.service_name = name.into();
        self.service_uuid = uuid;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_local_sender_label(mut self, label: impl Into<String>) -> Self {
        self.local_sender_label = label.into();
        self
    }

    pub fn with_fallback_sender_label(mut self, label: impl Into<String>) -> Self {
        self.fallback_sender_label = label.into();
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Check the configuration for values the controller cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.service_name.trim().is_empty() {
            return Err("service_name must not be empty".to_string());
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be greater than zero".to_string());
        }
        if self.event_buffer_size == 0 {
            return Err("event_buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}
