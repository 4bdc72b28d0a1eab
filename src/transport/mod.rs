//! Layer 1: the raw pipe between the two contexts.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

use crate::error::TransportResult;

pub mod memory;

pub use memory::MemoryTransport;

/// Bidirectional frame pipe between the host and the webview.
///
/// Frames are delivered in order and never dropped while both ends are
/// alive. Nothing is promised once either end has been torn down.
#[async_trait]
pub trait FrameTransport: Send + Sync + Debug {
    /// Post one frame to the other side.
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()>;

    /// Wait for the next frame from the other side.
    async fn recv_frame(&self) -> TransportResult<Bytes>;

    /// False once this end or its peer has been torn down. A `true` answer
    /// does not promise the next frame will be read.
    fn is_connected(&self) -> bool;

    /// Tear down this end of the pipe. The peer may still drain frames that
    /// were already queued, but its later sends fail.
    async fn close(&self) -> TransportResult<()>;

    fn stats(&self) -> Option<TransportStats> {
        None
    }

    fn name(&self) -> &str {
        "unknown"
    }
}

/// Statistics collected by transport implementations
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transport Statistics:")?;
        writeln!(f, "  Messages sent:     {}", self.messages_sent)?;
        writeln!(f, "  Messages received: {}", self.messages_received)?;
        writeln!(f, "  Bytes sent:        {}", self.bytes_sent)?;
        writeln!(f, "  Bytes received:    {}", self.bytes_received)?;
        writeln!(f, "  Send errors:       {}", self.send_errors)?;
        Ok(())
    }
}

#[async_trait]
impl<T: FrameTransport + ?Sized> FrameTransport for std::sync::Arc<T> {
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        (**self).send_frame(data).await
    }

    async fn recv_frame(&self) -> TransportResult<Bytes> {
        (**self).recv_frame().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn close(&self) -> TransportResult<()> {
        (**self).close().await
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
