use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{RpcError, RpcResult};
use crate::message::RequestId;

/// Settled value of a call: the response body or the remote error text.
pub(crate) type Outcome = Result<Value, String>;

/// Calls waiting for their response, keyed by request id.
///
/// Every entry is removed exactly once, by whichever of settle, evict or
/// drain reaches it first. The others find nothing and do nothing.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Outcome>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` and hand back the future that settles with it.
    pub fn register(self: &Arc<Self>, id: RequestId) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id, tx);
        PendingCall {
            id,
            rx,
            table: self.clone(),
        }
    }

    /// Deliver an outcome. Returns false when `id` is no longer tracked.
    pub fn settle(&self, id: RequestId, outcome: Outcome) -> bool {
        match self.entries.lock().remove(&id) {
            Some(tx) => {
                // The caller may have just given up; that is not an error.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn evict(&self, id: RequestId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Drop every entry; their callers see `ConnectionClosed`.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }
}

/// One in-flight call.
///
/// Resolves with the response, or with `ConnectionClosed` if the table was
/// drained. Dropping it, for instance when a timeout wins, evicts its entry.
#[derive(Debug)]
pub(crate) struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    table: Arc<PendingTable>,
}

impl Future for PendingCall {
    type Output = RpcResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(body))) => Poll::Ready(Ok(body)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(RpcError::Remote(error))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.table.evict(self.id);
    }
}
