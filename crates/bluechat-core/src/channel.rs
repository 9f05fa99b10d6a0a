//! Transfer channel over one established duplex stream
//!
//! A [`TransferChannel`] lives for exactly one connection. Inbound bytes are
//! surfaced as a lazy [`Stream`] of [`Message`]s, one element per underlying
//! read. No framing is applied, so the chunk boundaries of the transport decide
//! how application messages are split or coalesced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, Stream};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::errors::StreamFault;
use crate::transport::RadioStream;
use crate::types::{Message, TimeSource};

/// Wraps one [`RadioStream`] for the lifetime of a single connection
pub struct TransferChannel {
    stream: Box<dyn RadioStream>,
    sender_label: String,
    read_buffer_size: usize,
    time_source: Arc<dyn TimeSource>,
    closed: AtomicBool,
}

impl TransferChannel {
    pub fn new(
        stream: Box<dyn RadioStream>,
        config: &SessionConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let sender_label = stream
            .remote_name()
            .unwrap_or_else(|| config.fallback_sender_label.clone());

        Self {
            stream,
            sender_label,
            read_buffer_size: config.read_buffer_size.max(1),
            time_source,
            closed: AtomicBool::new(false),
        }
    }

    /// Label inbound messages are tagged with
    pub fn sender_label(&self) -> &str {
        &self.sender_label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lazy sequence of inbound messages
    ///
    /// Yields `Err` once and ends if the stream faults or the peer hangs up
    /// while the channel is still open. Ends silently once [`close`](Self::close)
    /// has been called.
    pub fn inbound_messages(
        self: &Arc<Self>,
    ) -> impl Stream<Item = Result<Message, StreamFault>> + Send + 'static {
        let buffer = vec![0u8; self.read_buffer_size];

        stream::unfold(Some((Arc::clone(self), buffer)), |state| async move {
            let (channel, mut buffer) = state?;
            if channel.is_closed() {
                return None;
            }

            match channel.stream.read(&mut buffer).await {
                Ok(0) if channel.is_closed() => None,
                Ok(0) => Some((Err(StreamFault::ClosedByPeer), None)),
                Ok(count) => {
                    let text = String::from_utf8_lossy(&buffer[..count]).into_owned();
                    let message =
                        Message::inbound(text, channel.sender_label.as_str(), channel.time_source.now());
                    Some((Ok(message), Some((channel, buffer))))
                }
                Err(e) if channel.is_closed() => {
                    debug!("Read ended after local close: {}", e);
                    None
                }
                Err(e) => Some((Err(StreamFault::Read(e)), None)),
            }
        })
    }

    /// Write `text` to the stream, reporting success as a boolean
    pub async fn send_message(&self, text: &str) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.stream.write(text.as_bytes()).await {
            Ok(()) => {
                debug!("Sent {} bytes to {}", text.len(), self.sender_label);
                true
            }
            Err(e) => {
                warn!("Failed to write to {}: {}", self.sender_label, e);
                false
            }
        }
    }

    /// Close the underlying stream. Only the first call reaches the stream.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stream.close().await;
        debug!("Transfer channel to {} closed", self.sender_label);
    }
}
