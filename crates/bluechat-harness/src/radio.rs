//! Virtual radio medium
//!
//! A [`VirtualRadio`] connects any number of [`VirtualTransport`] endpoints.
//! Endpoints discover each other, listen for and open connections, and expose
//! knobs for permissions, adapter state, pairing lists and connect latency so
//! tests can drive a session controller through every path deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{
    ListeningHandle, Peer, RadioPermission, RadioStream, RadioTransport, TransportError,
    TransportEvent,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::link::{StreamProbe, VirtualStream};

/// Capacity of each endpoint's notification channel
pub const EVENT_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Radio Medium
// ----------------------------------------------------------------------------

struct ListenerSlot {
    service_uuid: Uuid,
    incoming: mpsc::UnboundedSender<VirtualStream>,
}

#[derive(Default)]
struct Medium {
    endpoints: Vec<Weak<VirtualTransport>>,
    listeners: HashMap<String, ListenerSlot>,
}

/// Shared medium that endpoints communicate through
#[derive(Clone, Default)]
pub struct VirtualRadio {
    medium: Arc<Mutex<Medium>>,
}

impl VirtualRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint with all permissions granted and the radio on
    pub fn endpoint(&self, name: Option<&str>, address: &str) -> Arc<VirtualTransport> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let transport = Arc::new(VirtualTransport {
            radio: self.clone(),
            name: name.map(str::to_string),
            address: address.to_string(),
            events,
            settings: Mutex::new(EndpointSettings::default()),
            streams: Arc::new(Mutex::new(Vec::new())),
        });

        lock(&self.medium).endpoints.push(Arc::downgrade(&transport));
        debug!("Registered virtual endpoint {}", address);
        transport
    }

    fn live_endpoints(&self) -> Vec<Arc<VirtualTransport>> {
        let mut medium = lock(&self.medium);
        medium.endpoints.retain(|e| e.strong_count() > 0);
        medium.endpoints.iter().filter_map(Weak::upgrade).collect()
    }

    fn register_listener(&self, address: &str, slot: ListenerSlot) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if medium.listeners.contains_key(address) {
            return Err(TransportError::ListenFailed(format!(
                "{} is already listening",
                address
            )));
        }
        medium.listeners.insert(address.to_string(), slot);
        Ok(())
    }

    /// Whether `address` has an open listening socket
    pub fn is_listening(&self, address: &str) -> bool {
        lock(&self.medium).listeners.contains_key(address)
    }

    fn unregister_listener(&self, address: &str) {
        lock(&self.medium).listeners.remove(address);
    }

    fn route(
        &self,
        address: &str,
        service_uuid: Uuid,
    ) -> Option<mpsc::UnboundedSender<VirtualStream>> {
        let medium = lock(&self.medium);
        medium
            .listeners
            .get(address)
            .filter(|slot| slot.service_uuid == service_uuid)
            .map(|slot| slot.incoming.clone())
    }
}

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

struct EndpointSettings {
    denied: HashSet<RadioPermission>,
    enabled: bool,
    discoverable: bool,
    discovering: bool,
    paired: Vec<Peer>,
    connect_delay: Option<Duration>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            denied: HashSet::new(),
            enabled: true,
            discoverable: true,
            discovering: false,
            paired: Vec::new(),
            connect_delay: None,
        }
    }
}

/// One device on the virtual radio
pub struct VirtualTransport {
    radio: VirtualRadio,
    name: Option<String>,
    address: String,
    events: broadcast::Sender<TransportEvent>,
    settings: Mutex<EndpointSettings>,
    streams: Arc<Mutex<Vec<StreamProbe>>>,
}

impl VirtualTransport {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// How other endpoints see this one
    pub fn as_peer(&self) -> Peer {
        Peer::new(self.name.clone(), self.address.clone())
    }

    pub fn grant(&self, permission: RadioPermission) {
        lock(&self.settings).denied.remove(&permission);
    }

    pub fn revoke(&self, permission: RadioPermission) {
        lock(&self.settings).denied.insert(permission);
    }

    /// Switch the adapter on or off, notifying subscribers
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut settings = lock(&self.settings);
            settings.enabled = enabled;
            if !enabled {
                settings.discovering = false;
            }
        }
        self.emit(TransportEvent::RadioStateChanged { enabled });
    }

    pub fn set_discoverable(&self, discoverable: bool) {
        lock(&self.settings).discoverable = discoverable;
    }

    pub fn set_paired_peers(&self, peers: Vec<Peer>) {
        lock(&self.settings).paired = peers;
    }

    /// Delay applied before each outbound connect resolves
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.settings).connect_delay = delay;
    }

    pub fn is_listening(&self) -> bool {
        self.radio.is_listening(&self.address)
    }

    pub fn is_discovering(&self) -> bool {
        lock(&self.settings).discovering
    }

    /// Push an arbitrary notification to subscribers
    pub fn emit(&self, event: TransportEvent) {
        // Nobody listening is not an error for a simulated radio
        let _ = self.events.send(event);
    }

    /// End the running discovery as the radio would after its scan window
    pub fn finish_discovery(&self) {
        let was_discovering = std::mem::replace(&mut lock(&self.settings).discovering, false);
        if was_discovering {
            self.emit(TransportEvent::DiscoveryFinished);
        }
    }

    /// Probes for every stream this endpoint opened or accepted, oldest first
    pub fn streams(&self) -> Vec<StreamProbe> {
        lock(&self.streams).clone()
    }

    fn ensure_enabled(&self) -> Result<(), TransportError> {
        if lock(&self.settings).enabled {
            Ok(())
        } else {
            Err(TransportError::Unavailable)
        }
    }

    fn ensure_permission(&self, permission: RadioPermission) -> Result<(), TransportError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(TransportError::Unauthorized)
        }
    }
}

#[async_trait]
impl RadioTransport for VirtualTransport {
    fn has_permission(&self, permission: RadioPermission) -> bool {
        !lock(&self.settings).denied.contains(&permission)
    }

    fn is_enabled(&self) -> bool {
        lock(&self.settings).enabled
    }

    fn paired_peers(&self) -> Result<Vec<Peer>, TransportError> {
        self.ensure_permission(RadioPermission::Connect)?;
        self.ensure_enabled()?;
        Ok(lock(&self.settings).paired.clone())
    }

    fn begin_discovery(&self) -> Result<(), TransportError> {
        self.ensure_permission(RadioPermission::Scan)?;
        self.ensure_enabled()?;

        lock(&self.settings).discovering = true;
        self.emit(TransportEvent::DiscoveryStarted);

        for endpoint in self.radio.live_endpoints() {
            if endpoint.address == self.address {
                continue;
            }
            let visible = {
                let settings = lock(&endpoint.settings);
                settings.enabled && settings.discoverable
            };
            if visible {
                self.emit(TransportEvent::PeerFound(endpoint.as_peer()));
            }
        }
        Ok(())
    }

    fn cancel_discovery(&self) -> Result<(), TransportError> {
        self.ensure_permission(RadioPermission::Scan)?;
        self.finish_discovery();
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
        self.ensure_permission(RadioPermission::Connect)?;
        self.ensure_enabled()?;

        let (incoming, accepted) = mpsc::unbounded_channel();
        self.radio.register_listener(
            &self.address,
            ListenerSlot {
                service_uuid,
                incoming,
            },
        )?;
        info!("{} listening for {} ({})", self.address, service_name, service_uuid);

        let (closed, _) = watch::channel(false);
        Ok(Box::new(VirtualListener {
            radio: self.radio.clone(),
            address: self.address.clone(),
            accepted: tokio::sync::Mutex::new(accepted),
            closed,
            streams: Arc::clone(&self.streams),
        }))
    }

    async fn open_outbound(
        &self,
        address: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn RadioStream>, TransportError> {
        self.ensure_permission(RadioPermission::Connect)?;
        self.ensure_enabled()?;

        let delay = lock(&self.settings).connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let unreachable = || TransportError::Unreachable {
            address: address.to_string(),
        };
        let route = self.radio.route(address, service_uuid).ok_or_else(unreachable)?;
        let remote = self
            .radio
            .live_endpoints()
            .into_iter()
            .find(|e| e.address == address)
            .ok_or_else(unreachable)?;

        let (local, far) =
            VirtualStream::pair(self.name.clone(), &self.address, remote.name.clone(), address);
        route.send(far).map_err(|_| unreachable())?;

        lock(&self.streams).push(local.probe());
        debug!("Opened virtual link {}", local.probe().label());
        Ok(Box::new(local))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

/// Listening socket on the virtual radio
pub struct VirtualListener {
    radio: VirtualRadio,
    address: String,
    accepted: tokio::sync::Mutex<mpsc::UnboundedReceiver<VirtualStream>>,
    closed: watch::Sender<bool>,
    streams: Arc<Mutex<Vec<StreamProbe>>>,
}

#[async_trait]
impl ListeningHandle for VirtualListener {
    async fn accept(&self) -> Result<Box<dyn RadioStream>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut accepted = self.accepted.lock().await;

        let stream = tokio::select! {
            stream = accepted.recv() => stream,
            _ = closed.wait_for(|c| *c) => None,
        };

        match stream {
            Some(stream) if !*self.closed.borrow() => {
                lock(&self.streams).push(stream.probe());
                Ok(Box::new(stream))
            }
            _ => Err(TransportError::AcceptFailed("socket closed".to_string())),
        }
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            self.radio.unregister_listener(&self.address);
            debug!("{} stopped listening", self.address);
        }
    }
}

impl Drop for VirtualListener {
    fn drop(&mut self) {
        if !*self.closed.borrow() {
            self.radio.unregister_listener(&self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::SERIAL_PORT_SERVICE_UUID;

    #[tokio::test]
    async fn test_discovery_reports_visible_endpoints() {
        let radio = VirtualRadio::new();
        let phone = radio.endpoint(Some("phone"), "AA:01");
        let laptop = radio.endpoint(Some("laptop"), "AA:02");
        let hidden = radio.endpoint(None, "AA:03");
        hidden.set_discoverable(false);

        let mut events = phone.subscribe();
        phone.begin_discovery().unwrap();

        assert_eq!(events.recv().await.unwrap(), TransportEvent::DiscoveryStarted);
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::PeerFound(laptop.as_peer())
        );
        assert!(events.try_recv().is_err());
        assert!(phone.is_discovering());

        phone.cancel_discovery().unwrap();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::DiscoveryFinished);
        assert!(!phone.is_discovering());
    }

    #[tokio::test]
    async fn test_permissions_and_adapter_state_gate_operations() {
        let radio = VirtualRadio::new();
        let phone = radio.endpoint(None, "AA:01");

        phone.revoke(RadioPermission::Scan);
        assert!(matches!(
            phone.begin_discovery(),
            Err(TransportError::Unauthorized)
        ));
        phone.grant(RadioPermission::Scan);

        phone.set_enabled(false);
        assert!(matches!(
            phone.begin_discovery(),
            Err(TransportError::Unavailable)
        ));
        assert!(matches!(
            phone.paired_peers(),
            Err(TransportError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_matching_listener() {
        let radio = VirtualRadio::new();
        let phone = radio.endpoint(Some("phone"), "AA:01");
        let laptop = radio.endpoint(Some("laptop"), "AA:02");

        let err = phone
            .open_outbound("AA:02", SERIAL_PORT_SERVICE_UUID)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unreachable { .. }));

        let listener = laptop
            .listen("chat_service", SERIAL_PORT_SERVICE_UUID)
            .await
            .unwrap();
        assert!(laptop
            .listen("chat_service", SERIAL_PORT_SERVICE_UUID)
            .await
            .is_err());
        assert!(phone
            .open_outbound("AA:02", Uuid::nil())
            .await
            .is_err());

        let outbound = phone
            .open_outbound("AA:02", SERIAL_PORT_SERVICE_UUID)
            .await
            .unwrap();
        let inbound = listener.accept().await.unwrap();

        assert_eq!(outbound.remote_name().as_deref(), Some("laptop"));
        assert_eq!(inbound.remote_name().as_deref(), Some("phone"));
        assert_eq!(phone.streams().len(), 1);
        assert_eq!(laptop.streams().len(), 1);
    }

    #[tokio::test]
    async fn test_closing_listener_fails_pending_accept() {
        let radio = VirtualRadio::new();
        let laptop = radio.endpoint(None, "AA:02");
        let listener: Arc<dyn ListeningHandle> = Arc::from(
            laptop
                .listen("chat_service", SERIAL_PORT_SERVICE_UUID)
                .await
                .unwrap(),
        );

        let pending = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::task::yield_now().await;

        listener.close().await;
        listener.close().await;
        assert!(pending.await.unwrap().is_err());

        // The address is free to listen again
        assert!(laptop
            .listen("chat_service", SERIAL_PORT_SERVICE_UUID)
            .await
            .is_ok());
    }
}
