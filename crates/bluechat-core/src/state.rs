//! Snapshot aggregation
//!
//! Several independent sources feed the observable session state: the scan
//! flag, the scanned and paired peer sets, and a base record holding the
//! connection flags, the last error and the message log. Every update is
//! folded into the source record under one lock and a complete [`SessionSnapshot`] is
//! re-derived and published on a `watch` channel before the lock is released,
//! so each source's updates reach observers in the order they were made.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::outcome::ConnectionOutcome;
use crate::types::{Message, Peer, PeerSet};

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Complete, immutable view of the session at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub scanned_peers: PeerSet,
    pub paired_peers: PeerSet,
    pub is_scanning: bool,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub is_listening: bool,
    pub last_error: Option<String>,
    /// Message log of the live connection; always empty while disconnected
    pub messages: Vec<Message>,
}

/// Connection-related fields written by the session controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_listening: bool,
    pub last_error: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct Sources {
    is_scanning: bool,
    scanned: PeerSet,
    paired: PeerSet,
    base: BaseState,
}

impl Sources {
    fn derive(&self) -> SessionSnapshot {
        SessionSnapshot {
            scanned_peers: self.scanned.clone(),
            paired_peers: self.paired.clone(),
            is_scanning: self.is_scanning,
            is_connecting: self.base.is_connecting,
            is_connected: self.base.is_connected,
            is_listening: self.base.is_listening,
            last_error: self.base.last_error.clone(),
            messages: if self.base.is_connected {
                self.base.messages.clone()
            } else {
                Vec::new()
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Aggregator
// ----------------------------------------------------------------------------

/// Folds source updates into published snapshots
#[derive(Debug)]
pub struct StateAggregator {
    sources: Mutex<Sources>,
    publisher: watch::Sender<SessionSnapshot>,
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAggregator {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(SessionSnapshot::default());
        Self {
            sources: Mutex::new(Sources::default()),
            publisher,
        }
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.publisher.borrow().clone()
    }

    pub fn set_scanning(&self, is_scanning: bool) {
        self.update(|sources| sources.is_scanning = is_scanning);
    }

    pub fn clear_scanned_peers(&self) {
        self.update(|sources| sources.scanned = PeerSet::new());
    }

    /// Record a discovered peer; returns `false` if it was already known
    pub fn add_scanned_peer(&self, peer: Peer) -> bool {
        let mut inserted = false;
        self.update(|sources| inserted = sources.scanned.insert(peer));
        inserted
    }

    pub fn set_paired_peers(&self, peers: impl IntoIterator<Item = Peer>) {
        let paired: PeerSet = peers.into_iter().collect();
        self.update(|sources| sources.paired = paired);
    }

    /// Apply an arbitrary change to the base record
    pub fn update_base(&self, change: impl FnOnce(&mut BaseState)) {
        self.update(|sources| change(&mut sources.base));
    }

    /// Enter the connecting state for a new attempt
    ///
    /// The previous connection is gone by now and its error is stale.
    pub fn begin_attempt(&self, listening: bool) {
        self.update_base(|base| {
            base.is_connected = false;
            base.is_connecting = true;
            base.is_listening = listening;
            base.last_error = None;
        });
    }

    /// Fold the result of an attempt into the base record
    pub fn apply_outcome(&self, outcome: &ConnectionOutcome) {
        self.update_base(|base| {
            base.is_connecting = false;
            base.is_listening = false;
            match outcome {
                ConnectionOutcome::Established => {
                    base.is_connected = true;
                    base.last_error = None;
                    base.messages.clear();
                }
                ConnectionOutcome::Failed { reason } => {
                    base.is_connected = false;
                    base.last_error = Some(reason.clone());
                }
            }
        });
    }

    /// Reset connection flags after an explicit disconnect
    pub fn mark_disconnected(&self) {
        self.update_base(|base| {
            base.is_connected = false;
            base.is_connecting = false;
            base.is_listening = false;
        });
    }

    pub fn append_message(&self, message: Message) {
        self.update_base(|base| base.messages.push(message));
    }

    pub fn clear_error(&self) {
        self.update_base(|base| base.last_error = None);
    }

    fn lock(&self) -> MutexGuard<'_, Sources> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut Sources)) {
        let mut sources = self.lock();
        change(&mut sources);
        let next = sources.derive();

        // Publish while still holding the lock so updates cannot overtake each other
        let changed = self.publisher.send_if_modified(|current| {
            if same_snapshot(current, &next) {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            trace!("Published session snapshot");
        }
    }
}

/// Field-wise equality, including peer names
///
/// `Peer` equality only looks at addresses, so a renamed peer would compare
/// equal to its stale self.
fn same_snapshot(current: &SessionSnapshot, next: &SessionSnapshot) -> bool {
    current == next
        && same_peers(&current.scanned_peers, &next.scanned_peers)
        && same_peers(&current.paired_peers, &next.paired_peers)
}

fn same_peers(a: &PeerSet, b: &PeerSet) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.address == y.address && x.display_name == y.display_name)
}
