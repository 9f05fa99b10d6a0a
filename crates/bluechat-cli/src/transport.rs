//! TCP development transport
//!
//! Stands in for a short-range radio on hosts without one. Listening binds a
//! TCP socket, connecting opens a TCP stream and writes a preamble: the
//! 16-byte service UUID, then the device name as one length byte followed by
//! up to 255 bytes of UTF-8. The listening side verifies the UUID and labels
//! the stream with the name before handing it to the session. Paired and discoverable peers come from the
//! configuration file; a discovery cycle reports them and finishes after the
//! configured scan window.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluechat_core::{
    ListeningHandle, Peer, RadioPermission, RadioStream, RadioTransport, TransportError,
    TransportEvent,
};

use crate::config::CliAppConfig;

/// Length of the service UUID at the start of the preamble
pub const PREAMBLE_LEN: usize = 16;

/// Longest device name the preamble carries, in bytes
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// How long an accepted socket may take to send its preamble
pub const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

/// Service UUID followed by the length-prefixed device name
fn encode_preamble(service_uuid: Uuid, device_name: &str) -> Vec<u8> {
    let mut end = device_name.len().min(MAX_NAME_LEN);
    while !device_name.is_char_boundary(end) {
        end -= 1;
    }
    let name = &device_name.as_bytes()[..end];

    let mut preamble = Vec::with_capacity(PREAMBLE_LEN + 1 + name.len());
    preamble.extend_from_slice(service_uuid.as_bytes());
    preamble.push(name.len() as u8);
    preamble.extend_from_slice(name);
    preamble
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

struct DiscoveryState {
    discovering: Arc<AtomicBool>,
    window: Option<JoinHandle<()>>,
}

/// TCP-backed implementation of the radio capability set
pub struct TcpTransport {
    config: CliAppConfig,
    events: broadcast::Sender<TransportEvent>,
    discovery: Mutex<DiscoveryState>,
}

impl TcpTransport {
    pub fn new(config: CliAppConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            events,
            discovery: Mutex::new(DiscoveryState {
                discovering: Arc::new(AtomicBool::new(false)),
                window: None,
            }),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl RadioTransport for TcpTransport {
    // Desktop hosts have no runtime radio permissions
    fn has_permission(&self, _permission: RadioPermission) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn paired_peers(&self) -> Result<Vec<Peer>, TransportError> {
        Ok(self.config.paired_peers())
    }

    fn begin_discovery(&self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectFailed(format!("no async runtime: {}", e)))?;

        let mut discovery = self.discovery.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = discovery.window.take() {
            window.abort();
        }

        discovery.discovering.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::DiscoveryStarted);
        for peer in self.config.discoverable_peers() {
            self.emit(TransportEvent::PeerFound(peer));
        }

        let events = self.events.clone();
        let discovering = Arc::clone(&discovery.discovering);
        let scan_window = self.config.tcp.scan_window();
        discovery.window = Some(runtime.spawn(async move {
            tokio::time::sleep(scan_window).await;
            if discovering.swap(false, Ordering::SeqCst) {
                let _ = events.send(TransportEvent::DiscoveryFinished);
            }
        }));

        debug!("Discovery window of {:?} started", scan_window);
        Ok(())
    }

    fn cancel_discovery(&self) -> Result<(), TransportError> {
        let mut discovery = self.discovery.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = discovery.window.take() {
            window.abort();
        }
        if discovery.discovering.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::DiscoveryFinished);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn listen(
        &self,
        service_name: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn ListeningHandle>, TransportError> {
        let address = &self.config.tcp.bind_address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::ListenFailed(format!("{}: {}", address, e)))?;

        info!("Listening for {} on {}", service_name, address);
        let (closed, _) = watch::channel(false);
        Ok(Box::new(TcpListeningHandle {
            listener: tokio::sync::Mutex::new(Some(listener)),
            service_uuid,
            closed,
        }))
    }

    async fn open_outbound(
        &self,
        address: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn RadioStream>, TransportError> {
        let mut stream = TcpStream::connect(address).await.map_err(|e| {
            if e.kind() == io::ErrorKind::ConnectionRefused {
                TransportError::Unreachable {
                    address: address.to_string(),
                }
            } else {
                TransportError::ConnectFailed(format!("{}: {}", address, e))
            }
        })?;

        let preamble = encode_preamble(service_uuid, &self.config.tcp.device_name);
        stream.write_all(&preamble).await?;
        debug!("Sent service preamble to {}", address);

        Ok(Box::new(TcpRadioStream::new(
            stream,
            self.config.peer_name(address),
        )))
    }
}

// ----------------------------------------------------------------------------
// Listening Handle
// ----------------------------------------------------------------------------

/// Bound TCP socket waiting for one peer
pub struct TcpListeningHandle {
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    service_uuid: Uuid,
    closed: watch::Sender<bool>,
}

impl TcpListeningHandle {
    /// Check the requested service and return the peer's device name
    async fn read_preamble(&self, stream: &mut TcpStream) -> Result<Option<String>, TransportError> {
        tokio::time::timeout(PREAMBLE_TIMEOUT, self.read_preamble_fields(stream))
            .await
            .map_err(|_| TransportError::AcceptFailed("no service preamble".to_string()))?
    }

    async fn read_preamble_fields(
        &self,
        stream: &mut TcpStream,
    ) -> Result<Option<String>, TransportError> {
        let mut uuid = [0u8; PREAMBLE_LEN];
        stream.read_exact(&mut uuid).await?;
        let requested = Uuid::from_bytes(uuid);
        if requested != self.service_uuid {
            return Err(TransportError::AcceptFailed(format!(
                "unknown service {}",
                requested
            )));
        }

        let mut name = vec![0u8; usize::from(stream.read_u8().await?)];
        stream.read_exact(&mut name).await?;
        let name = String::from_utf8_lossy(&name).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }
}

#[async_trait]
impl ListeningHandle for TcpListeningHandle {
    async fn accept(&self) -> Result<Box<dyn RadioStream>, TransportError> {
        let mut closed = self.closed.subscribe();
        let guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return Err(TransportError::Closed);
        };

        let (mut stream, remote) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = closed.wait_for(|c| *c) => return Err(TransportError::Closed),
        };
        drop(guard);

        debug!("Accepted TCP connection from {}", remote);
        let remote_name = match self.read_preamble(&mut stream).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Rejected connection from {}: {}", remote, e);
                return Err(e);
            }
        };
        Ok(Box::new(TcpRadioStream::new(stream, remote_name)))
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            // Dropping the listener frees the port
            self.listener.lock().await.take();
            debug!("Listening socket closed");
        }
    }
}

// ----------------------------------------------------------------------------
// Stream
// ----------------------------------------------------------------------------

/// One connected TCP stream
pub struct TcpRadioStream {
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    remote_name: Option<String>,
    closed: watch::Sender<bool>,
}

impl TcpRadioStream {
    pub fn new(stream: TcpStream, remote_name: Option<String>) -> Self {
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            remote_name,
            closed,
        }
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "stream closed")
    }
}

#[async_trait]
impl RadioStream for TcpRadioStream {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Self::closed_error());
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read(buf) => result,
            _ = closed.wait_for(|c| *c) => Err(Self::closed_error()),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if *self.closed.borrow() {
            return Err(Self::closed_error());
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("TCP shutdown failed: {}", e);
            }
        }
    }

    fn remote_name(&self) -> Option<String> {
        self.remote_name.clone()
    }
}
