//! Mirrored state over a broadcast channel.
//!
//! The host owns the value and fires it whenever it changes; the webview
//! keeps the last value it has seen.

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;

use crate::channel::Channel;
use crate::client::RpcClient;
use crate::error::RpcResult;
use crate::host::RpcHost;
use crate::subscribers::Subscription;

/// Host-side holder of the current value of a broadcast channel.
pub struct StatePublisher<T> {
    host: Arc<RpcHost>,
    channel: Channel<T>,
    state: Mutex<Option<T>>,
}

impl<T> StatePublisher<T>
where
    T: Serialize + Clone + Send + Sync,
{
    pub fn new(host: Arc<RpcHost>, channel: Channel<T>) -> Self {
        Self {
            host,
            channel,
            state: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    /// Replace the value and broadcast it.
    pub async fn publish(&self, value: T) -> RpcResult<()> {
        *self.state.lock() = Some(value.clone());
        self.host.fire(&self.channel, &value).await
    }

    /// Mutate the current value in place and broadcast the result.
    ///
    /// Returns `false` without firing when nothing has been published yet.
    pub async fn update(&self, f: impl FnOnce(&mut T)) -> RpcResult<bool> {
        let snapshot = {
            let mut state = self.state.lock();
            match state.as_mut() {
                Some(value) => {
                    f(value);
                    value.clone()
                }
                None => return Ok(false),
            }
        };

        self.host.fire(&self.channel, &snapshot).await?;
        Ok(true)
    }

    /// Fire the current value again, for a view that just attached.
    ///
    /// Returns `false` without firing when nothing has been published yet.
    pub async fn rebroadcast(&self) -> RpcResult<bool> {
        let Some(snapshot) = self.current() else {
            return Ok(false);
        };
        self.host.fire(&self.channel, &snapshot).await?;
        Ok(true)
    }

    pub fn current(&self) -> Option<T> {
        self.state.lock().clone()
    }

    /// Forget the value. Nothing is broadcast.
    pub fn clear(&self) {
        self.state.lock().take();
    }
}

impl<T> std::fmt::Debug for StatePublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePublisher")
            .field("channel", &self.channel)
            .field("published", &self.state.lock().is_some())
            .finish()
    }
}

/// Webview-side mirror of a broadcast channel.
///
/// Holds `None` until the first broadcast arrives.
pub struct StateObject<T> {
    receiver: watch::Receiver<Option<T>>,
    subscription: Subscription,
}

impl<T> StateObject<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: &RpcClient, channel: &Channel<T>) -> Self {
        let (sender, receiver) = watch::channel(None);
        let subscription = client.on(channel, move |value: T| {
            sender.send_replace(Some(value));
        });

        Self {
            receiver,
            subscription,
        }
    }

    pub fn data(&self) -> Option<T> {
        self.receiver.borrow().clone()
    }

    /// Receiver notified on every broadcast.
    pub fn watch(&self) -> watch::Receiver<Option<T>> {
        self.receiver.clone()
    }

    /// Stop mirroring. The last value stays readable.
    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObject")
            .field("channel", &self.subscription.channel())
            .field("data", &*self.receiver.borrow())
            .finish()
    }
}
