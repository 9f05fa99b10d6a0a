//! Core data types: peers, chat messages and timestamps

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer
// ----------------------------------------------------------------------------

/// A discoverable or previously paired remote device
///
/// The address is the identity key: two peers are equal iff their addresses
/// match, regardless of the advertised name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Advertised device name, if the transport reported one
    pub display_name: Option<String>,
    /// Stable transport address
    pub address: String,
}

impl Peer {
    /// Create a new peer
    pub fn new(display_name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            display_name,
            address: address.into(),
        }
    }

    /// Create a peer with a known display name
    pub fn named(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(Some(display_name.into()), address)
    }

    /// Name suitable for display, falling back to the address
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Set
// ----------------------------------------------------------------------------

/// Insertion-ordered set of peers, deduplicated by address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet(Vec<Peer>);

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer, returning `false` if its address is already present
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.0.contains(&peer) {
            return false;
        }
        self.0.push(peer);
        true
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.0.contains(peer)
    }

    pub fn get(&self, address: &str) -> Option<&Peer> {
        self.0.iter().find(|p| p.address == address)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peer> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Peer> for PeerSet {
    fn from_iter<I: IntoIterator<Item = Peer>>(iter: I) -> Self {
        let mut set = PeerSet::new();
        for peer in iter {
            set.insert(peer);
        }
        set
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a Peer;
    type IntoIter = std::slice::Iter<'a, Peer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// One entry of the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender_label: String,
    /// `true` for messages this side sent
    pub is_local: bool,
    pub timestamp_millis: u64,
}

impl Message {
    /// A message received from the remote peer
    pub fn inbound(text: impl Into<String>, sender_label: impl Into<String>, at: Timestamp) -> Self {
        Self {
            text: text.into(),
            sender_label: sender_label.into(),
            is_local: false,
            timestamp_millis: at.as_millis(),
        }
    }

    /// A message written by the local user
    pub fn local(text: impl Into<String>, sender_label: impl Into<String>, at: Timestamp) -> Self {
        Self {
            text: text.into(),
            sender_label: sender_label.into(),
            is_local: true,
            timestamp_millis: at.as_millis(),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Source of message capture timestamps
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
