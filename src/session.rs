use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::channel::Channel;
use crate::client::RpcClient;
use crate::subscribers::Subscription;

/// Broadcast payload that belongs to one session.
pub trait SessionEvent {
    fn session_id(&self) -> u64;
}

type SessionCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Routes<T> {
    callbacks: Mutex<HashMap<u64, (u64, SessionCallback<T>)>>,
    next_token: AtomicU64,
}

impl<T> Routes<T> {
    fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    fn route(&self, event: T)
    where
        T: SessionEvent,
    {
        let session_id = event.session_id();
        let callback = self
            .callbacks
            .lock()
            .get(&session_id)
            .map(|(_, callback)| callback.clone());

        match callback {
            Some(callback) => callback(event),
            None => debug!(session_id, "No callback for session event"),
        }
    }

    fn remove(&self, session_id: u64, token: u64) {
        let mut callbacks = self.callbacks.lock();
        if callbacks.get(&session_id).is_some_and(|(t, _)| *t == token) {
            callbacks.remove(&session_id);
        }
    }
}

/// Routes the events of one broadcast channel to per-session callbacks.
///
/// Events for a session nobody registered are dropped.
pub struct ResponseSessions<T> {
    routes: Arc<Routes<T>>,
    subscription: Subscription,
}

impl<T> ResponseSessions<T>
where
    T: SessionEvent + DeserializeOwned + Send + 'static,
{
    pub fn new(client: &RpcClient, channel: &Channel<T>) -> Self {
        let routes = Arc::new(Routes::new());
        let subscription = client.on(channel, {
            let routes = routes.clone();
            move |event: T| routes.route(event)
        });

        Self {
            routes,
            subscription,
        }
    }

    /// Deliver the events of `session_id` to `callback`. A later call for
    /// the same session replaces it.
    pub fn subscribe<F>(&self, session_id: u64, callback: F) -> SessionSubscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let token = self.routes.next_token.fetch_add(1, Ordering::Relaxed);
        self.routes
            .callbacks
            .lock()
            .insert(session_id, (token, Arc::new(callback)));

        SessionSubscription {
            routes: Arc::downgrade(&self.routes),
            session_id,
            token,
        }
    }

    pub fn is_tracked(&self, session_id: u64) -> bool {
        self.routes.callbacks.lock().contains_key(&session_id)
    }

    pub fn dispose(&self) {
        self.subscription.dispose();
        self.routes.callbacks.lock().clear();
    }
}

impl<T> std::fmt::Debug for ResponseSessions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sessions: Vec<u64> = self.routes.callbacks.lock().keys().copied().collect();
        sessions.sort_unstable();
        f.debug_struct("ResponseSessions")
            .field("channel", &self.subscription.channel())
            .field("sessions", &sessions)
            .finish()
    }
}

/// Handle on one session callback.
///
/// Disposing it after the session was re-registered leaves the newer
/// callback in place.
#[must_use = "a dropped SessionSubscription keeps its callback registered"]
pub struct SessionSubscription<T> {
    routes: Weak<Routes<T>>,
    session_id: u64,
    token: u64,
}

impl<T> SessionSubscription<T> {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn dispose(&self) {
        if let Some(routes) = self.routes.upgrade() {
            routes.remove(self.session_id, self.token);
        }
    }
}

impl<T> std::fmt::Debug for SessionSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSubscription")
            .field("session_id", &self.session_id)
            .finish()
    }
}
