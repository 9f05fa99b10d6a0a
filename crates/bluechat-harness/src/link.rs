//! In-memory duplex links
//!
//! A link is a pair of [`VirtualStream`]s backed by `tokio::io::duplex`. Each
//! end carries a [`StreamProbe`] through which tests can count explicit
//! closes and inject write or read faults.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bluechat_core::RadioStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Bytes buffered in each direction of a link
pub const LINK_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Open,
    Closed,
    Faulted,
}

// ----------------------------------------------------------------------------
// Stream Probe
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ProbeInner {
    label: String,
    status: watch::Sender<LinkStatus>,
    close_calls: AtomicUsize,
    fail_writes: AtomicBool,
}

/// Test-side view of one stream end
#[derive(Debug, Clone)]
pub struct StreamProbe {
    inner: Arc<ProbeInner>,
}

impl StreamProbe {
    fn new(label: String) -> Self {
        let (status, _) = watch::channel(LinkStatus::Open);
        Self {
            inner: Arc::new(ProbeInner {
                label,
                status,
                close_calls: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// Description of this end, e.g. `"phone -> laptop"`
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Number of explicit `close()` calls on the stream
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the stream was closed or dropped
    pub fn is_closed(&self) -> bool {
        *self.inner.status.borrow() != LinkStatus::Open
    }

    /// Make every subsequent write fail with `BrokenPipe`
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the pending and all later reads fail with `ConnectionReset`
    pub fn break_link(&self) {
        self.transition(LinkStatus::Faulted);
    }

    fn transition(&self, next: LinkStatus) -> bool {
        self.inner.status.send_if_modified(|status| {
            if *status == LinkStatus::Open {
                *status = next;
                true
            } else {
                false
            }
        })
    }

    fn status_error(&self) -> Option<io::Error> {
        let status = *self.inner.status.borrow();
        link_error(status)
    }
}

fn link_error(status: LinkStatus) -> Option<io::Error> {
    match status {
        LinkStatus::Open => None,
        LinkStatus::Closed => Some(io::Error::new(
            io::ErrorKind::NotConnected,
            "stream closed",
        )),
        LinkStatus::Faulted => Some(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "link broken",
        )),
    }
}

// ----------------------------------------------------------------------------
// Virtual Stream
// ----------------------------------------------------------------------------

/// One end of an in-memory duplex link
pub struct VirtualStream {
    reader: Mutex<ReadHalf<DuplexStream>>,
    writer: Mutex<WriteHalf<DuplexStream>>,
    remote_name: Option<String>,
    probe: StreamProbe,
}

impl VirtualStream {
    /// Create both ends of a link between `a` and `b`
    ///
    /// The first stream belongs to `a` and reports `b_name` as its remote name.
    pub fn pair(
        a_name: Option<String>,
        a_address: &str,
        b_name: Option<String>,
        b_address: &str,
    ) -> (VirtualStream, VirtualStream) {
        let (a_io, b_io) = tokio::io::duplex(LINK_CAPACITY);
        let a = VirtualStream::new(a_io, b_name, format!("{} -> {}", a_address, b_address));
        let b = VirtualStream::new(b_io, a_name, format!("{} -> {}", b_address, a_address));
        (a, b)
    }

    fn new(io: DuplexStream, remote_name: Option<String>, label: String) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            remote_name,
            probe: StreamProbe::new(label),
        }
    }

    pub fn probe(&self) -> StreamProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl RadioStream for VirtualStream {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.probe.status_error() {
            return Err(e);
        }

        let mut status = self.probe.inner.status.subscribe();
        let interrupted = async move {
            match status.wait_for(|s| *s != LinkStatus::Open).await {
                Ok(s) => *s,
                Err(_) => LinkStatus::Closed,
            }
        };

        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read(buf) => result,
            next = interrupted => Err(link_error(next).unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "link state changed")
            })),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(e) = self.probe.status_error() {
            return Err(e);
        }
        if self.probe.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write fault"));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn close(&self) {
        self.probe.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.transition(LinkStatus::Closed) {
            // Shutting down the write half delivers EOF to the other end
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
            debug!("Closed link {}", self.probe.label());
        }
    }

    fn remote_name(&self) -> Option<String> {
        self.remote_name.clone()
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.probe.transition(LinkStatus::Closed);
    }
}
