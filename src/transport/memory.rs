use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

use crate::error::{TransportError, TransportResult};
use crate::transport::{FrameTransport, TransportStats};

/// In-process frame transport, one end of a connected pair.
///
/// Both directions are unbounded: a send never waits on the peer.
pub struct MemoryTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    closed: AtomicBool,
    shutdown: Notify,
    stats: Arc<Mutex<TransportStats>>,
    name: String,
}

impl MemoryTransport {
    /// Create a pair of connected transports: `(host, webview)`.
    pub fn pair(name: impl Into<String>) -> (Self, Self) {
        let name = name.into();

        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        let host = Self::new(tx1, rx2, format!("{}-host", name));
        let webview = Self::new(tx2, rx1, format!("{}-webview", name));

        (host, webview)
    }

    fn new(
        sender: mpsc::UnboundedSender<Bytes>,
        receiver: mpsc::UnboundedReceiver<Bytes>,
        name: String,
    ) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            stats: Arc::new(Mutex::new(TransportStats::default())),
            name,
        }
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        let result = match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(Bytes::copy_from_slice(data))
                .map_err(|_| TransportError::SendFailed {
                    reason: "Peer dropped".into(),
                }),
            None => Err(TransportError::Closed),
        };

        let mut stats = self.stats.lock();
        match result {
            Ok(()) => {
                stats.messages_sent += 1;
                stats.bytes_sent += data.len() as u64;
            }
            Err(_) => stats.send_errors += 1,
        }

        result
    }

    async fn recv_frame(&self) -> TransportResult<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut receiver = self.receiver.lock().await;
        let frame = tokio::select! {
            frame = receiver.recv() => Some(frame),
            _ = self.shutdown.notified() => None,
        };
        let bytes = match frame {
            Some(Some(bytes)) => bytes,
            Some(None) => return Err(TransportError::Closed),
            None => {
                // close() could not reach the receiver while we held it.
                receiver.close();
                return Err(TransportError::Closed);
            }
        };

        let mut stats = self.stats.lock();
        stats.messages_received += 1;
        stats.bytes_received += bytes.len() as u64;

        Ok(bytes)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self
                .sender
                .lock()
                .as_ref()
                .is_some_and(|sender| !sender.is_closed())
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the sender lets the peer drain what is queued, then see Closed.
        self.sender.lock().take();
        // Closing the receiver makes the peer's sends fail from now on.
        if let Ok(mut receiver) = self.receiver.try_lock() {
            receiver.close();
        }
        self.shutdown.notify_one();
        Ok(())
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(self.stats.lock().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
