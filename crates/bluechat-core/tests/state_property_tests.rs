//! Property-based tests for snapshot aggregation
//!
//! These tests verify that the published snapshot stays consistent with its
//! sources under arbitrary interleavings of updates.

use std::collections::HashSet;

use bluechat_core::{
    ConnectionOutcome, Message, Peer, SessionConfig, SessionController, StateAggregator,
    Timestamp, TransportEvent,
};
use bluechat_harness::VirtualRadio;
use proptest::prelude::*;

mod test_utils;
use test_utils::WAIT;

#[derive(Debug, Clone)]
enum StateOp {
    Scanning(bool),
    Found(u8),
    ClearScanned,
    Begin { listening: bool },
    Established,
    Failed,
    Disconnected,
    Append,
}

fn arb_state_op() -> impl Strategy<Value = StateOp> {
    prop_oneof![
        any::<bool>().prop_map(StateOp::Scanning),
        (0u8..8).prop_map(StateOp::Found),
        Just(StateOp::ClearScanned),
        any::<bool>().prop_map(|listening| StateOp::Begin { listening }),
        Just(StateOp::Established),
        Just(StateOp::Failed),
        Just(StateOp::Disconnected),
        Just(StateOp::Append),
    ]
}

#[derive(Debug, Clone, Copy)]
enum DiscoveryOp {
    Start,
    Stop,
    WindowElapsed,
}

fn arb_discovery_op() -> impl Strategy<Value = DiscoveryOp> {
    prop_oneof![
        Just(DiscoveryOp::Start),
        Just(DiscoveryOp::Stop),
        Just(DiscoveryOp::WindowElapsed),
    ]
}

proptest! {
    /// Property: messages are visible only while connected, and scanned peers
    /// never contain two entries with the same address
    #[test]
    fn snapshot_invariants_hold(ops in prop::collection::vec(arb_state_op(), 0..64)) {
        let aggregator = StateAggregator::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                StateOp::Scanning(on) => aggregator.set_scanning(on),
                StateOp::Found(n) => {
                    aggregator.add_scanned_peer(Peer::new(None, format!("AA:{:02}", n)));
                }
                StateOp::ClearScanned => aggregator.clear_scanned_peers(),
                StateOp::Begin { listening } => aggregator.begin_attempt(listening),
                StateOp::Established => aggregator.apply_outcome(&ConnectionOutcome::Established),
                StateOp::Failed => {
                    aggregator.apply_outcome(&ConnectionOutcome::failed("Connection lost"))
                }
                StateOp::Disconnected => aggregator.mark_disconnected(),
                StateOp::Append => aggregator.append_message(Message::inbound(
                    format!("m{}", step),
                    "peer",
                    Timestamp::new(step as u64),
                )),
            }

            let snapshot = aggregator.snapshot();
            if !snapshot.is_connected {
                prop_assert!(snapshot.messages.is_empty());
            }
            if snapshot.is_listening {
                prop_assert!(snapshot.is_connecting);
            }
            let addresses: HashSet<_> =
                snapshot.scanned_peers.iter().map(|p| p.address.clone()).collect();
            prop_assert_eq!(addresses.len(), snapshot.scanned_peers.len());
        }
    }

    /// Property: is_scanning equals the value implied by the most recent
    /// discovery notification
    #[test]
    fn scanning_flag_tracks_latest_notification(
        ops in prop::collection::vec(arb_discovery_op(), 0..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (is_scanning, is_discovering) = runtime.block_on(async move {
            let radio = VirtualRadio::new();
            let endpoint = radio.endpoint(Some("alpha"), "AA:01");
            let controller = SessionController::new(endpoint.clone(), SessionConfig::default());

            for op in ops {
                match op {
                    DiscoveryOp::Start => controller.start_discovery(),
                    DiscoveryOp::Stop => controller.stop_discovery(),
                    DiscoveryOp::WindowElapsed => endpoint.finish_discovery(),
                }
            }

            // Notifications are folded in order, so once the sentinel shows up
            // every earlier one has been applied
            let sentinel = Peer::named("sentinel", "FF:FF");
            endpoint.emit(TransportEvent::PeerFound(sentinel.clone()));

            let mut snapshots = controller.subscribe();
            let snapshot = tokio::time::timeout(
                WAIT,
                snapshots.wait_for(|s| s.scanned_peers.contains(&sentinel)),
            )
            .await
            .unwrap()
            .unwrap()
            .clone();

            (snapshot.is_scanning, endpoint.is_discovering())
        });

        prop_assert_eq!(is_scanning, is_discovering);
    }
}
