//! Session core for BlueChat
//!
//! This crate sits between a short-range radio transport and a chat front end.
//! It discovers nearby peers, holds exactly one duplex byte-stream connection
//! (accepted by listening or opened towards a chosen peer), streams inbound
//! messages out of it and publishes a consistent [`SessionSnapshot`] to
//! observers.
//!
//! ## Architecture
//!
//! - [`types`] - Peers, messages and timestamps
//! - [`outcome`] - The result of a connection attempt
//! - [`errors`] - Transport faults and the session error taxonomy
//! - [`config`] - Session configuration
//! - [`transport`] - The capability set a radio transport must provide
//! - [`channel`] - Transfer channel wrapping one established stream
//! - [`state`] - Snapshot aggregation
//! - [`session`] - The session controller
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluechat_core::{RadioTransport, SessionConfig, SessionController};
//!
//! # async fn example(transport: Arc<dyn RadioTransport>) {
//! let controller = SessionController::new(transport, SessionConfig::default());
//! let mut snapshots = controller.subscribe();
//!
//! controller.start_discovery();
//! while snapshots.changed().await.is_ok() {
//!     let snapshot = snapshots.borrow_and_update().clone();
//!     if let Some(peer) = snapshot.scanned_peers.iter().next() {
//!         controller.connect_to_peer(peer).await;
//!         break;
//!     }
//! }
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod errors;
pub mod outcome;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

pub use channel::TransferChannel;
pub use config::{SessionConfig, SERIAL_PORT_SERVICE_UUID};
pub use errors::{SessionError, SessionResult, StreamFault, TransportError};
pub use outcome::ConnectionOutcome;
pub use session::SessionController;
pub use state::{SessionSnapshot, StateAggregator};
pub use transport::{
    ListeningHandle, RadioPermission, RadioStream, RadioTransport, TransportEvent,
};
pub use types::{Message, Peer, PeerSet, SystemTimeSource, TimeSource, Timestamp};
