use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Callback fed with the raw body of every broadcast on its channel.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Broadcast listeners per channel name, kept in registration order.
///
/// No buffering: a listener only sees broadcasts that arrive after it was
/// added.
#[derive(Default)]
pub struct SubscriberRegistry {
    channels: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>, channel: &str, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));

        Subscription {
            registry: Arc::downgrade(self),
            channel: channel.to_string(),
            id,
        }
    }

    fn unsubscribe(&self, channel: &str, id: u64) -> bool {
        let mut channels = self.channels.lock();
        let Some(listeners) = channels.get_mut(channel) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;

        if listeners.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Fan `body` out to every listener of `channel`.
    ///
    /// Returns false when nobody listens on `channel`. Listeners run outside
    /// the lock, so they may subscribe or unsubscribe while being called. A
    /// panicking listener is logged and skipped.
    pub fn dispatch(&self, channel: &str, body: &Value) -> bool {
        let listeners: Vec<Listener> = match self.channels.lock().get(channel) {
            Some(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            None => return false,
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(body))).is_err() {
                error!(channel, "Broadcast listener panicked");
            }
        }
        true
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels.lock().get(channel).map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.lock().contains_key(channel)
    }

    pub fn clear(&self) {
        self.channels.lock().clear();
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock();
        f.debug_map()
            .entries(channels.iter().map(|(name, l)| (name, l.len())))
            .finish()
    }
}

/// Handle on one registered listener.
#[must_use = "a dropped Subscription keeps its listener registered; call dispose() to remove it"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    channel: String,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove exactly this listener. Safe to call more than once.
    pub fn dispose(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.channel, self.id);
        }
    }
}
