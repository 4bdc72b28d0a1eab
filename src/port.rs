//! Layer 2: envelope-level view of a transport.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::codec::{Codec, JsonCodec};
use crate::error::{TransportError, TransportResult};
use crate::message::Message;
use crate::transport::{FrameTransport, TransportStats};

/// One side's handle on the message pipe.
#[async_trait]
pub trait MessagePort: Send + Sync + Debug {
    async fn send(&self, message: &Message) -> TransportResult<()>;

    /// Receive the next envelope. A frame that decodes into no known shape
    /// is reported as [`TransportError::Protocol`] and does not end the pipe.
    async fn recv(&self) -> TransportResult<Message>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> TransportResult<()>;

    fn stats(&self) -> Option<TransportStats> {
        None
    }
}

/// Adapter that wraps a FrameTransport and encodes envelopes with a codec.
#[derive(Debug)]
pub struct FramedPort<F: FrameTransport, C: Codec = JsonCodec> {
    inner: F,
    codec: C,
}

impl<F: FrameTransport> FramedPort<F, JsonCodec> {
    /// Create a new port speaking the JSON wire format.
    pub fn new(transport: F) -> Self {
        Self {
            inner: transport,
            codec: JsonCodec,
        }
    }
}

impl<F: FrameTransport, C: Codec> FramedPort<F, C> {
    pub fn with_codec(transport: F, codec: C) -> Self {
        Self {
            inner: transport,
            codec,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[async_trait]
impl<F: FrameTransport, C: Codec> MessagePort for FramedPort<F, C> {
    async fn send(&self, message: &Message) -> TransportResult<()> {
        let bytes = self
            .codec
            .encode(message)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.inner.send_frame(&bytes).await
    }

    async fn recv(&self) -> TransportResult<Message> {
        let bytes = self.inner.recv_frame().await?;
        self.codec
            .decode(&bytes)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }

    fn stats(&self) -> Option<TransportStats> {
        self.inner.stats()
    }
}

#[async_trait]
impl<T: MessagePort + ?Sized> MessagePort for Arc<T> {
    async fn send(&self, message: &Message) -> TransportResult<()> {
        (**self).send(message).await
    }

    async fn recv(&self) -> TransportResult<Message> {
        (**self).recv().await
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
}
