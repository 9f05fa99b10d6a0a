//! Session controller
//!
//! The [`SessionController`] owns discovery state and the lifecycle of the one
//! active connection. Every connect or listen attempt runs in a single spawned
//! task that performs the blocking accept/connect and then forwards inbound
//! messages. The task is tracked together with the transfer channel and the
//! listening handle in `ActiveConnection`; starting a new attempt, closing
//! the connection or releasing the session aborts that task and waits for it
//! before the stream is closed, so no reader outlives its connection.
//!
//! Each attempt is tagged with a generation number. Background work re-checks
//! the generation under the connection lock before touching shared state,
//! which keeps a superseded attempt from installing its stream or reporting
//! its outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::TransferChannel;
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult, TransportError};
use crate::outcome::{ConnectionOutcome, CONNECTION_INTERRUPTED, CONNECTION_LOST};
use crate::state::{SessionSnapshot, StateAggregator};
use crate::transport::{
    ListeningHandle, RadioPermission, RadioStream, RadioTransport, TransportEvent,
};
use crate::types::{Message, Peer, SystemTimeSource, TimeSource};

// ----------------------------------------------------------------------------
// Active Connection
// ----------------------------------------------------------------------------

/// Resources of the current connection attempt, guarded by one async lock
#[derive(Default)]
struct ActiveConnection {
    generation: u64,
    attempt: Option<JoinHandle<()>>,
    listener: Option<Arc<dyn ListeningHandle>>,
    channel: Option<Arc<TransferChannel>>,
}

/// State shared between the controller and its background tasks
struct Shared {
    transport: Arc<dyn RadioTransport>,
    config: SessionConfig,
    time_source: Arc<dyn TimeSource>,
    state: StateAggregator,
    errors: broadcast::Sender<String>,
    incoming: broadcast::Sender<Message>,
    outcomes: broadcast::Sender<ConnectionOutcome>,
    active: tokio::sync::Mutex<ActiveConnection>,
    released: AtomicBool,
}

// ----------------------------------------------------------------------------
// Session Controller
// ----------------------------------------------------------------------------

/// Discovery and single-connection session manager
///
/// Must be created inside a Tokio runtime: construction spawns the task that
/// forwards transport notifications into the session state.
pub struct SessionController {
    shared: Arc<Shared>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Create a controller stamping messages with wall-clock time
    pub fn new(transport: Arc<dyn RadioTransport>, config: SessionConfig) -> Self {
        Self::with_time_source(transport, config, Arc::new(SystemTimeSource))
    }

    /// Create a controller with a custom time source
    pub fn with_time_source(
        transport: Arc<dyn RadioTransport>,
        config: SessionConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let capacity = config.event_buffer_size.max(1);
        let (errors, _) = broadcast::channel(capacity);
        let (incoming, _) = broadcast::channel(capacity);
        let (outcomes, _) = broadcast::channel(capacity);

        let shared = Arc::new(Shared {
            transport,
            config,
            time_source,
            state: StateAggregator::new(),
            errors,
            incoming,
            outcomes,
            active: tokio::sync::Mutex::new(ActiveConnection::default()),
            released: AtomicBool::new(false),
        });

        shared.refresh_paired_peers();

        let events = shared.transport.subscribe();
        let event_task = tokio::spawn(forward_transport_events(Arc::downgrade(&shared), events));

        info!("Session controller started");
        Self {
            shared,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Receiver for the unified session snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state.subscribe()
    }

    /// Latest session snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.snapshot()
    }

    /// One-shot human-readable error notifications
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.shared.errors.subscribe()
    }

    /// Messages received from the connected peer
    pub fn incoming_messages(&self) -> broadcast::Receiver<Message> {
        self.shared.incoming.subscribe()
    }

    /// Every connection outcome folded into the session state
    pub fn outcomes(&self) -> broadcast::Receiver<ConnectionOutcome> {
        self.shared.outcomes.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Forget the last reported connection error
    pub fn clear_error(&self) {
        self.shared.state.clear_error();
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Start peer discovery
    ///
    /// Clears the scanned peers and reloads the paired peers. Missing
    /// permission or a disabled radio is reported on the error stream.
    pub fn start_discovery(&self) {
        if let Err(e) = self
            .shared
            .check_ready(RadioPermission::Scan, "Permission required for scanning.")
        {
            self.shared.report_error(e);
            return;
        }

        self.shared.state.clear_scanned_peers();
        self.shared.refresh_paired_peers();

        match self.shared.transport.begin_discovery() {
            Ok(()) => debug!("Requested peer discovery"),
            Err(e) => self.shared.report_error(e.into()),
        }
    }

    /// Cancel peer discovery
    pub fn stop_discovery(&self) {
        if self.shared.reject_if_released() {
            return;
        }
        self.shared.stop_discovery();
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Wait for one inbound connection
    ///
    /// Supersedes any previous attempt. The outcome is folded into the
    /// snapshot and published on [`outcomes`](Self::outcomes).
    pub async fn listen_for_connection(&self) {
        if let Err(e) = self.shared.check_ready(
            RadioPermission::Connect,
            "Permission required to accept connections.",
        ) {
            self.shared.report_error(e);
            return;
        }

        let mut active = self.shared.active.lock().await;
        self.shared.teardown(&mut active).await;

        let generation = active.generation;
        self.shared.state.begin_attempt(true);

        let shared = Arc::clone(&self.shared);
        active.attempt = Some(tokio::spawn(async move {
            shared.run_listen(generation).await;
        }));
        info!("Waiting for an incoming connection (attempt {})", generation);
    }

    /// Connect to `peer`
    ///
    /// Cancels discovery and supersedes any previous attempt before the
    /// outbound stream is opened.
    pub async fn connect_to_peer(&self, peer: &Peer) {
        if let Err(e) = self
            .shared
            .check_ready(RadioPermission::Connect, "Permission required to connect.")
        {
            self.shared.report_error(e);
            return;
        }

        self.shared.stop_discovery();

        let mut active = self.shared.active.lock().await;
        self.shared.teardown(&mut active).await;

        let generation = active.generation;
        self.shared.state.begin_attempt(false);

        let shared = Arc::clone(&self.shared);
        let target = peer.clone();
        active.attempt = Some(tokio::spawn(async move {
            shared.run_connect(generation, target).await;
        }));
        info!("Connecting to {} (attempt {})", peer, generation);
    }

    /// Send `text` over the active connection
    ///
    /// Returns `false` without side effects when nothing is connected, and
    /// `false` when the write fails. A failed write does not disconnect.
    pub async fn send_message(&self, text: &str) -> bool {
        if self.shared.is_released() {
            return false;
        }

        let channel = self.shared.active.lock().await.channel.clone();
        let Some(channel) = channel else {
            debug!("Dropping outbound message: no active connection");
            return false;
        };

        if !channel.send_message(text).await {
            return false;
        }

        let message = Message::local(
            text,
            self.shared.config.local_sender_label.as_str(),
            self.shared.time_source.now(),
        );
        self.shared.state.append_message(message);
        true
    }

    /// Close the active stream and any listening handle. Idempotent.
    pub async fn close_connection(&self) {
        self.shared.disconnect().await;
    }

    /// Stop observing the transport and close the connection
    ///
    /// Terminal: later operations are rejected.
    pub async fn release(&self) {
        if self.shared.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let event_task = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = event_task {
            task.abort();
            let _ = task.await;
        }

        self.shared.disconnect().await;
        info!("Session controller released");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let event_task = self
            .event_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = event_task {
            task.abort();
        }
        if let Ok(mut active) = self.shared.active.try_lock() {
            if let Some(task) = active.attempt.take() {
                task.abort();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Background Work
// ----------------------------------------------------------------------------

impl Shared {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn reject_if_released(&self) -> bool {
        if self.is_released() {
            self.report_error(SessionError::Released);
            return true;
        }
        false
    }

    /// Whether an operation needing `permission` may start
    fn check_ready(&self, permission: RadioPermission, denied: &str) -> SessionResult<()> {
        if self.is_released() {
            return Err(SessionError::Released);
        }
        if !self.transport.has_permission(permission) {
            return Err(SessionError::Authorization(denied.to_string()));
        }
        if !self.transport.is_enabled() {
            return Err(SessionError::TransportUnavailable(
                "radio is switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn report_error(&self, error: SessionError) {
        warn!("{}", error);
        // No subscribers is fine: errors are transient
        let _ = self.errors.send(error.to_string());
    }

    fn publish_outcome(&self, outcome: ConnectionOutcome) {
        self.state.apply_outcome(&outcome);
        let _ = self.outcomes.send(outcome);
    }

    fn refresh_paired_peers(&self) {
        if !self.transport.has_permission(RadioPermission::Connect) {
            return;
        }
        match self.transport.paired_peers() {
            Ok(peers) => {
                debug!("Loaded {} paired peers", peers.len());
                self.state.set_paired_peers(peers);
            }
            Err(e) => warn!("Failed to enumerate paired peers: {}", e),
        }
    }

    fn stop_discovery(&self) {
        if !self.transport.has_permission(RadioPermission::Scan) {
            self.report_error(SessionError::Authorization(
                "Bluetooth Scan permission is required to stop scanning.".to_string(),
            ));
            return;
        }
        if let Err(e) = self.transport.cancel_discovery() {
            self.report_error(e.into());
        }
    }

    /// Cancel the running attempt and release its stream and listener
    ///
    /// Bumps the generation so late work from the old attempt is ignored.
    async fn teardown(&self, active: &mut ActiveConnection) {
        active.generation = active.generation.wrapping_add(1);

        if let Some(task) = active.attempt.take() {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Connection task panicked: {}", e);
                }
            }
        }
        if let Some(channel) = active.channel.take() {
            channel.close().await;
        }
        if let Some(listener) = active.listener.take() {
            listener.close().await;
        }
    }

    async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        self.teardown(&mut active).await;
        drop(active);

        self.state.mark_disconnected();
        debug!("Connection closed");
    }

    /// Tear down attempt `generation` from inside its own task and report `reason`
    async fn fail_attempt(&self, generation: u64, reason: String) {
        let mut active = self.active.lock().await;
        if active.generation != generation {
            return;
        }

        active.generation = active.generation.wrapping_add(1);
        // The handle belongs to the running task; detach instead of aborting ourselves
        active.attempt.take();
        if let Some(channel) = active.channel.take() {
            channel.close().await;
        }
        if let Some(listener) = active.listener.take() {
            listener.close().await;
        }

        self.publish_outcome(ConnectionOutcome::failed(reason));
    }

    async fn run_listen(self: Arc<Self>, generation: u64) {
        let listener: Arc<dyn ListeningHandle> = match self
            .transport
            .listen(&self.config.service_name, self.config.service_uuid)
            .await
        {
            Ok(listener) => Arc::from(listener),
            Err(e) => {
                warn!("Failed to start listening: {}", e);
                self.fail_attempt(generation, SessionError::from(e).to_string())
                    .await;
                return;
            }
        };

        {
            let mut active = self.active.lock().await;
            if active.generation != generation {
                drop(active);
                listener.close().await;
                return;
            }
            active.listener = Some(Arc::clone(&listener));
        }

        let accepted = listener.accept().await;

        // The service accepts exactly one connection
        listener.close().await;
        {
            let mut active = self.active.lock().await;
            if active.generation == generation {
                active.listener = None;
            }
        }

        match accepted {
            Ok(stream) => self.establish(generation, stream).await,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                self.fail_attempt(generation, SessionError::from(e).to_string())
                    .await;
            }
        }
    }

    async fn run_connect(self: Arc<Self>, generation: u64, peer: Peer) {
        let open = self
            .transport
            .open_outbound(&peer.address, self.config.service_uuid);

        let opened = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, open)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => open.await,
        };

        match opened {
            Ok(stream) => self.establish(generation, stream).await,
            Err(e) => {
                warn!("Failed to connect to {}: {}", peer, e);
                self.fail_attempt(generation, format!("{}: {}", CONNECTION_INTERRUPTED, e))
                    .await;
            }
        }
    }

    /// Install `stream` as the active connection and forward its messages
    async fn establish(self: &Arc<Self>, generation: u64, stream: Box<dyn RadioStream>) {
        let channel = Arc::new(TransferChannel::new(
            stream,
            &self.config,
            Arc::clone(&self.time_source),
        ));

        {
            let mut active = self.active.lock().await;
            if active.generation != generation {
                drop(active);
                channel.close().await;
                return;
            }
            active.channel = Some(Arc::clone(&channel));
            self.publish_outcome(ConnectionOutcome::Established);
        }
        info!("Connection established with {}", channel.sender_label());

        self.forward_inbound(generation, channel).await;
    }

    async fn forward_inbound(&self, generation: u64, channel: Arc<TransferChannel>) {
        let mut inbound = Box::pin(channel.inbound_messages());

        while let Some(item) = inbound.next().await {
            match item {
                Ok(message) => {
                    if channel.is_closed() {
                        break;
                    }
                    debug!(
                        "Received {} bytes from {}",
                        message.text.len(),
                        message.sender_label
                    );
                    let _ = self.incoming.send(message.clone());
                    self.state.append_message(message);
                }
                Err(fault) => {
                    let error = SessionError::from(fault);
                    warn!("Inbound stream from {} failed: {}", channel.sender_label(), error);
                    self.fail_attempt(generation, CONNECTION_LOST.to_string())
                        .await;
                    return;
                }
            }
        }
        debug!("Inbound forwarding for {} ended", channel.sender_label());
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::DiscoveryStarted => {
                debug!("Discovery started");
                self.state.set_scanning(true);
            }
            TransportEvent::DiscoveryFinished => {
                debug!("Discovery finished");
                self.state.set_scanning(false);
            }
            TransportEvent::PeerFound(peer) => {
                let label = peer.to_string();
                if self.state.add_scanned_peer(peer) {
                    debug!("Discovered peer {}", label);
                }
            }
            TransportEvent::RadioStateChanged { enabled: true } => {
                info!("Radio enabled");
            }
            TransportEvent::RadioStateChanged { enabled: false } => {
                self.report_error(SessionError::TransportUnavailable(
                    "radio switched off".to_string(),
                ));
                self.state.set_scanning(false);
                self.disconnect().await;
            }
        }
    }
}

/// Fold transport notifications into the session until the controller goes away
async fn forward_transport_events(
    shared: Weak<Shared>,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} transport notifications", skipped);
                continue;
            }
            Err(RecvError::Closed) => {
                debug!("Transport notification channel closed");
                break;
            }
        };

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_transport_event(event).await;
    }
}
