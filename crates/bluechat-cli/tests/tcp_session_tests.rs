//! Session tests over the TCP development transport
//!
//! These tests run two session controllers against real loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use bluechat_cli::{CliAppConfig, PeerEntry, TcpTransport};
use bluechat_core::{
    ConnectionOutcome, Peer, SessionConfig, SessionController, SessionSnapshot,
};
use tokio::sync::broadcast;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn loopback(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

fn config(name: &str, port: u16, peers: Vec<PeerEntry>) -> CliAppConfig {
    let mut config = CliAppConfig::default();
    config.tcp.device_name = name.to_string();
    config.tcp.bind_address = loopback(port);
    config.tcp.scan_window_ms = 50;
    config.peers = peers;
    config
}

fn entry(name: &str, address: String, paired: bool, discoverable: bool) -> PeerEntry {
    PeerEntry {
        name: Some(name.to_string()),
        address,
        paired,
        discoverable,
    }
}

fn controller(config: CliAppConfig) -> SessionController {
    let session = config.session.clone();
    SessionController::new(Arc::new(TcpTransport::new(config)), session)
}

async fn wait_for(
    controller: &SessionController,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut snapshots = controller.subscribe();
    let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot publisher dropped");
    snapshot.clone()
}

async fn next<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("broadcast channel closed")
}

/// Connect `client` to `peer`, retrying while the listener is still coming up
async fn connect_when_listening(client: &SessionController, peer: &Peer) -> ConnectionOutcome {
    let mut outcomes = client.outcomes();
    tokio::time::timeout(WAIT, async {
        loop {
            client.connect_to_peer(peer).await;
            match outcomes.recv().await {
                Ok(ConnectionOutcome::Failed { reason }) if reason.contains("No reachable peer") => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(outcome) => return outcome,
                Err(e) => panic!("outcome stream failed: {}", e),
            }
        }
    })
    .await
    .expect("peer never started listening")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_over_loopback() {
    let alpha_port = free_port();
    let alpha = controller(config("alpha", alpha_port, vec![]));
    let beta = controller(config(
        "beta",
        free_port(),
        vec![entry("alpha", loopback(alpha_port), true, true)],
    ));
    let mut alpha_incoming = alpha.incoming_messages();
    let mut beta_incoming = beta.incoming_messages();

    alpha.listen_for_connection().await;
    let outcome =
        connect_when_listening(&beta, &Peer::named("alpha", loopback(alpha_port))).await;
    assert!(outcome.is_established());

    wait_for(&alpha, |s| s.is_connected).await;
    wait_for(&beta, |s| s.is_connected).await;

    assert!(beta.send_message("hello").await);
    let message = next(&mut alpha_incoming).await;
    assert_eq!(message.text, "hello");
    assert_eq!(message.sender_label, "beta");

    assert!(alpha.send_message("hi beta").await);
    let message = next(&mut beta_incoming).await;
    assert_eq!(message.text, "hi beta");
    assert_eq!(message.sender_label, "alpha");

    beta.close_connection().await;
    let snapshot = wait_for(&alpha, |s| !s.is_connected).await;
    assert_eq!(snapshot.last_error.as_deref(), Some("Connection lost"));
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn test_unnamed_connector_is_labelled_unknown() {
    let alpha_port = free_port();
    let alpha = controller(config("alpha", alpha_port, vec![]));
    let beta = controller(config("", free_port(), vec![]));
    let mut alpha_incoming = alpha.incoming_messages();

    alpha.listen_for_connection().await;
    let outcome = connect_when_listening(&beta, &Peer::new(None, loopback(alpha_port))).await;
    assert!(outcome.is_established());
    wait_for(&beta, |s| s.is_connected).await;

    assert!(beta.send_message("who am i").await);
    let message = next(&mut alpha_incoming).await;
    assert_eq!(message.sender_label, "Unknown device");
}

#[tokio::test]
async fn test_wrong_service_is_rejected() {
    let alpha_port = free_port();
    let alpha = controller(config("alpha", alpha_port, vec![]));

    let mut beta_config = config("beta", free_port(), vec![]);
    beta_config.session = SessionConfig::default().with_service("other_service", Uuid::new_v4());
    let beta = controller(beta_config);

    let mut outcomes = alpha.outcomes();
    alpha.listen_for_connection().await;
    connect_when_listening(&beta, &Peer::new(None, loopback(alpha_port))).await;

    let outcome = next(&mut outcomes).await;
    assert!(outcome.failure_reason().unwrap().contains("unknown service"));

    let snapshot = alpha.snapshot();
    assert!(!snapshot.is_connected);
    assert!(!snapshot.is_listening);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let alpha = controller(config("alpha", free_port(), vec![]));
    let mut outcomes = alpha.outcomes();

    alpha
        .connect_to_peer(&Peer::new(None, loopback(free_port())))
        .await;

    match next(&mut outcomes).await {
        ConnectionOutcome::Failed { reason } => {
            assert!(reason.starts_with("Connection was interrupted"))
        }
        ConnectionOutcome::Established => panic!("connected to a closed port"),
    }
    assert!(!alpha.snapshot().is_connecting);
}

#[tokio::test]
async fn test_discovery_reports_configured_peers() {
    let alpha = controller(config(
        "alpha",
        free_port(),
        vec![
            entry("phone", "10.0.0.2:7070".to_string(), true, true),
            entry("kiosk", "10.0.0.3:7070".to_string(), false, true),
            entry("watch", "10.0.0.4:7070".to_string(), true, false),
        ],
    ));
    assert_eq!(alpha.snapshot().paired_peers.len(), 2);

    alpha.start_discovery();
    let snapshot = wait_for(&alpha, |s| !s.is_scanning && !s.scanned_peers.is_empty()).await;

    assert_eq!(snapshot.scanned_peers.len(), 2);
    assert!(snapshot.scanned_peers.get("10.0.0.4:7070").is_none());
    assert_eq!(
        snapshot.scanned_peers.get("10.0.0.3:7070").unwrap().label(),
        "kiosk"
    );
}
