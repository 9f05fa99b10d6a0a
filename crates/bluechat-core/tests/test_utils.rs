//! Test utilities for driving session controllers over the virtual radio

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{
    SessionConfig, SessionController, SessionSnapshot, TimeSource, Timestamp,
};
use bluechat_harness::{VirtualRadio, VirtualTransport};
use tokio::sync::broadcast;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Manually advanced clock
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Devices
// ----------------------------------------------------------------------------

/// A virtual endpoint together with the controller driving it
pub struct Device {
    pub radio: Arc<VirtualTransport>,
    pub controller: SessionController,
}

impl Device {
    pub fn new(radio: &VirtualRadio, name: &str, address: &str) -> Self {
        Self::with_config(radio, name, address, SessionConfig::default())
    }

    pub fn with_config(
        radio: &VirtualRadio,
        name: &str,
        address: &str,
        config: SessionConfig,
    ) -> Self {
        let endpoint = radio.endpoint(Some(name), address);
        let controller = SessionController::with_time_source(
            endpoint.clone(),
            config,
            Arc::new(MockTimeSource::new_at(1_000)),
        );
        Self {
            radio: endpoint,
            controller,
        }
    }

    /// Wait until a snapshot satisfies `predicate` and return it
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut snapshots = self.controller.subscribe();
        let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("snapshot publisher dropped");
        snapshot.clone()
    }

    /// Start listening and return once the socket is registered
    pub async fn listen(&self) {
        self.controller.listen_for_connection().await;
        eventually(|| self.radio.is_listening()).await;
    }
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Receive the next broadcast item within [`WAIT`]
pub async fn next<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("broadcast channel closed")
}

/// Listen on `server`, connect from `client` and wait until both are connected
pub async fn connect(server: &Device, client: &Device) {
    server.listen().await;
    client.controller.connect_to_peer(&server.radio.as_peer()).await;

    server.wait_for(|s| s.is_connected).await;
    client.wait_for(|s| s.is_connected).await;
}

/// Two devices, `alpha` at `AA:01` and `beta` at `AA:02`, connected to each other
pub async fn connected_pair(radio: &VirtualRadio) -> (Device, Device) {
    let alpha = Device::new(radio, "alpha", "AA:01");
    let beta = Device::new(radio, "beta", "AA:02");
    connect(&alpha, &beta).await;
    (alpha, beta)
}
