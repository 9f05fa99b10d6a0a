//! Terminal rendering of session snapshots
//!
//! [`SnapshotPrinter`] turns the stream of snapshots into the lines a user
//! should see: connection state transitions and each chat message once.

use bluechat_core::{Message, Peer, PeerSet, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    Waiting,
    Connecting,
    Connected,
}

impl Link {
    fn of(snapshot: &SessionSnapshot) -> Self {
        if snapshot.is_connected {
            Link::Connected
        } else if snapshot.is_listening {
            Link::Waiting
        } else if snapshot.is_connecting {
            Link::Connecting
        } else {
            Link::Idle
        }
    }
}

/// Tracks what has already been shown for one session
#[derive(Debug)]
pub struct SnapshotPrinter {
    link: Link,
    attempted: bool,
    connected: bool,
    shown_messages: usize,
}

impl Default for SnapshotPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPrinter {
    pub fn new() -> Self {
        Self {
            link: Link::Idle,
            attempted: false,
            connected: false,
            shown_messages: 0,
        }
    }

    /// Lines to print for `snapshot`, given everything printed before
    pub fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        let link = Link::of(snapshot);
        if link != self.link {
            match link {
                Link::Waiting => lines.push("* Waiting for a peer to connect...".to_string()),
                Link::Connecting => lines.push("* Connecting...".to_string()),
                Link::Connected => {
                    lines.push("* Connected. Type a message and press enter (/quit to leave).".to_string())
                }
                Link::Idle => match &snapshot.last_error {
                    Some(reason) => lines.push(format!("* Disconnected: {}", reason)),
                    None => lines.push("* Disconnected".to_string()),
                },
            }
            if link != Link::Idle {
                self.attempted = true;
            }
            if link == Link::Connected {
                self.connected = true;
            }
            self.link = link;
        }

        // A new connection starts a fresh log
        if snapshot.messages.len() < self.shown_messages {
            self.shown_messages = 0;
        }
        for message in &snapshot.messages[self.shown_messages..] {
            lines.push(format_message(message));
        }
        self.shown_messages = snapshot.messages.len();

        lines
    }

    /// Whether an attempt was made and nothing is connected or pending any more
    pub fn session_ended(&self) -> bool {
        self.attempted && self.link == Link::Idle
    }

    /// Why the session ended without ever connecting, if it did
    pub fn failure(&self, snapshot: &SessionSnapshot) -> Option<String> {
        if !self.session_ended() || self.connected {
            return None;
        }
        Some(
            snapshot
                .last_error
                .clone()
                .unwrap_or_else(|| "no connection was made".to_string()),
        )
    }
}

pub fn format_message(message: &Message) -> String {
    format!("[{}] {}", message.sender_label, message.text.trim_end())
}

/// Human-readable listing of a peer set
pub fn format_peers(title: &str, peers: &PeerSet) -> Vec<String> {
    let mut lines = vec![format!("{} ({}):", title, peers.len())];
    lines.extend(peers.iter().map(|peer: &Peer| format!("  {}", peer)));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::Timestamp;

    fn connected_with(texts: &[&str]) -> SessionSnapshot {
        SessionSnapshot {
            is_connected: true,
            messages: texts
                .iter()
                .map(|t| Message::inbound(*t, "phone", Timestamp::new(0)))
                .collect(),
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn test_messages_printed_once() {
        let mut printer = SnapshotPrinter::new();

        let lines = printer.render(&connected_with(&["hi"]));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "[phone] hi");

        let lines = printer.render(&connected_with(&["hi", "there\n"]));
        assert_eq!(lines, vec!["[phone] there".to_string()]);

        assert!(printer.render(&connected_with(&["hi", "there\n"])).is_empty());
    }

    #[test]
    fn test_session_end_detected_after_attempt() {
        let mut printer = SnapshotPrinter::new();
        printer.render(&SessionSnapshot::default());
        assert!(!printer.session_ended());

        let connecting = SessionSnapshot {
            is_connecting: true,
            ..SessionSnapshot::default()
        };
        assert_eq!(printer.render(&connecting), vec!["* Connecting...".to_string()]);
        assert!(!printer.session_ended());

        let failed = SessionSnapshot {
            last_error: Some("Connection lost".to_string()),
            ..SessionSnapshot::default()
        };
        assert_eq!(
            printer.render(&failed),
            vec!["* Disconnected: Connection lost".to_string()]
        );
        assert!(printer.session_ended());
    }

    #[test]
    fn test_failure_only_when_never_connected() {
        let connecting = SessionSnapshot {
            is_connecting: true,
            ..SessionSnapshot::default()
        };
        let refused = SessionSnapshot {
            last_error: Some("Connection was interrupted: No reachable peer at 10.0.0.9:7070".to_string()),
            ..SessionSnapshot::default()
        };

        let mut printer = SnapshotPrinter::new();
        printer.render(&connecting);
        assert_eq!(printer.failure(&connecting), None);
        printer.render(&refused);
        assert_eq!(printer.failure(&refused), refused.last_error);

        let mut printer = SnapshotPrinter::new();
        printer.render(&connecting);
        printer.render(&connected_with(&[]));
        let lost = SessionSnapshot {
            last_error: Some("Connection lost".to_string()),
            ..SessionSnapshot::default()
        };
        printer.render(&lost);
        assert!(printer.session_ended());
        assert_eq!(printer.failure(&lost), None);
    }

    #[test]
    fn test_quitting_before_attempt_is_not_a_failure() {
        let mut printer = SnapshotPrinter::new();
        let idle = SessionSnapshot::default();
        printer.render(&idle);
        assert_eq!(printer.failure(&idle), None);
    }

    #[test]
    fn test_reconnect_resets_message_cursor() {
        let mut printer = SnapshotPrinter::new();
        printer.render(&connected_with(&["a", "b"]));
        printer.render(&SessionSnapshot::default());

        let lines = printer.render(&connected_with(&["c"]));
        assert!(lines.contains(&"[phone] c".to_string()));
    }

    #[test]
    fn test_format_peers() {
        let peers: PeerSet = vec![Peer::named("phone", "10.0.0.2:7070"), Peer::new(None, "10.0.0.3:7070")]
            .into_iter()
            .collect();
        assert_eq!(
            format_peers("Paired", &peers),
            vec![
                "Paired (2):".to_string(),
                "  phone (10.0.0.2:7070)".to_string(),
                "  10.0.0.3:7070".to_string(),
            ]
        );
    }
}
