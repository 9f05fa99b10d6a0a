//! Radio transport capability set
//!
//! The session controller depends only on these traits. Concrete transports
//! (a platform Bluetooth stack, the in-memory virtual radio used by tests, the
//! TCP development transport in the CLI) live in their own crates.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::TransportError;
use crate::types::Peer;

/// Permissions the host platform may withhold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioPermission {
    /// Start or cancel peer discovery
    Scan,
    /// Enumerate bonded devices, listen and connect
    Connect,
}

/// Notifications pushed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DiscoveryStarted,
    DiscoveryFinished,
    PeerFound(Peer),
    RadioStateChanged { enabled: bool },
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Abstract short-range radio
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Whether the host granted `permission`
    fn has_permission(&self, permission: RadioPermission) -> bool;

    /// Whether the radio is currently switched on
    fn is_enabled(&self) -> bool;

    /// Devices bonded with this one
    fn paired_peers(&self) -> Result<Vec<Peer>, TransportError>;

    /// Ask the radio to start discovery; results arrive as [`TransportEvent`]s
    fn begin_discovery(&self) -> Result<(), TransportError>;

    /// Ask the radio to stop discovery
    fn cancel_discovery(&self) -> Result<(), TransportError>;

    /// Subscribe to discovery and adapter notifications
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Open a listening socket for the given service record
    async fn listen(
        &self,
        service_name: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn ListeningHandle>, TransportError>;

    /// Open an outbound stream to `address`; blocks until connected or failed
    async fn open_outbound(
        &self,
        address: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn RadioStream>, TransportError>;
}

/// A listening socket that accepts exactly one inbound stream
#[async_trait]
pub trait ListeningHandle: Send + Sync {
    /// Block until a remote peer connects
    async fn accept(&self) -> Result<Box<dyn RadioStream>, TransportError>;

    /// Close the socket. Idempotent; a pending `accept` fails promptly.
    async fn close(&self);
}

/// One established duplex byte stream
///
/// All methods take `&self` so that a write can proceed while a read is
/// pending. Dropping a stream must release it.
#[async_trait]
pub trait RadioStream: Send + Sync {
    /// Read into `buf`; `Ok(0)` means the remote side closed
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write all of `bytes`
    async fn write(&self, bytes: &[u8]) -> std::io::Result<()>;

    /// Close the stream; a pending `read` fails promptly
    async fn close(&self);

    /// Name advertised by the remote device
    fn remote_name(&self) -> Option<String>;
}
