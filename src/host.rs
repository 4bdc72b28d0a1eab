//! Host side: binds channel names to services and answers their requests.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::args::FromArgs;
use crate::channel::Channel;
use crate::error::{HandlerError, RpcResult, TransportError};
use crate::message::{Broadcast, Message, Request, Response};
use crate::port::MessagePort;

/// Implementation bound to a channel.
///
/// Receives the method name and positional arguments of every request on
/// that channel and produces the response body.
#[async_trait]
pub trait Service: Send + Sync {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<S: Service + ?Sized> Service for Arc<S> {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        (**self).call(method, args).await
    }
}

type MethodFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// A [`Service`] assembled from one closure per method.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodFn>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method working on the raw argument list.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let method: MethodFn = Arc::new(move |args: Vec<Value>| func(args).boxed());
        self.methods.insert(name.into(), method);
        self
    }

    /// Add a method with typed arguments and result.
    ///
    /// Arguments that do not decode into `A` fail the call with the decode
    /// error as its message.
    pub fn typed<A, R, F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        A: FromArgs + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let func = Arc::new(func);
        self.method(name, move |args: Vec<Value>| {
            let func = func.clone();
            async move {
                let args = A::from_args(args)?;
                let result = func(args).await?;
                Ok::<Value, HandlerError>(serde_json::to_value(result)?)
            }
        })
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[async_trait]
impl Service for MethodTable {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        match self.methods.get(method) {
            Some(func) => func(args).await,
            None => Err(HandlerError::UnknownMethod(method.to_string())),
        }
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}

type ServiceMap = Arc<RwLock<HashMap<String, Arc<dyn Service>>>>;

/// Host Dispatcher.
///
/// Requests are answered exactly once each, except those addressed to a
/// channel with no bound service: they are logged and left unanswered, and
/// the caller's timeout is its only signal.
pub struct RpcHost {
    port: Arc<dyn MessagePort>,
    services: ServiceMap,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcHost {
    pub fn new(port: impl MessagePort + 'static) -> Self {
        Self {
            port: Arc::new(port),
            services: Arc::new(RwLock::new(HashMap::new())),
            listener: Mutex::new(None),
        }
    }

    /// Bind `service` to the channel's name.
    ///
    /// Last write wins: a previous binding for the same name is replaced and
    /// returned.
    pub fn register_instance<T, S>(&self, channel: &Channel<T>, service: S) -> Option<Arc<dyn Service>>
    where
        T: ?Sized,
        S: Service + 'static,
    {
        let previous = self
            .services
            .write()
            .insert(channel.name().to_string(), Arc::new(service));

        if previous.is_some() {
            debug!(channel = channel.name(), "Replaced service binding");
        }
        previous
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.services.read().contains_key(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Start answering requests. Calling it again replaces the listener.
    pub fn init(&self) {
        let handle = tokio::spawn(listen(self.port.clone(), self.services.clone()));
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Push `body` to whoever listens on `channel` on the other side.
    ///
    /// Completes once the broadcast is handed to the transport; says nothing
    /// about whether anyone received it.
    pub async fn fire<T>(&self, channel: &Channel<T>, body: &T) -> RpcResult<()>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let broadcast = Broadcast::new(channel.name(), body);
        self.port.send(&broadcast.into()).await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    /// Stop processing inbound messages. Bindings are kept.
    pub fn dispose(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    pub async fn close(&self) -> RpcResult<()> {
        self.dispose();
        self.port.close().await?;
        Ok(())
    }
}

impl Drop for RpcHost {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RpcHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcHost")
            .field("channels", &self.channels())
            .field("listening", &self.listener.lock().is_some())
            .finish()
    }
}

async fn listen(port: Arc<dyn MessagePort>, services: ServiceMap) {
    loop {
        match port.recv().await {
            Ok(Message::Request(request)) => {
                let service = services.read().get(&request.channel).cloned();
                match service {
                    Some(service) => {
                        tokio::spawn(dispatch(port.clone(), service, request));
                    }
                    None => {
                        let mut available: Vec<String> = services.read().keys().cloned().collect();
                        available.sort();
                        error!(
                            channel = %request.channel,
                            id = %request.id,
                            ?available,
                            "Trying to call on an unknown channel"
                        );
                    }
                }
            }
            Ok(message) => error!(kind = message.kind(), "Received incompatible message"),
            Err(TransportError::Protocol(reason)) => {
                error!(%reason, "Received incompatible message")
            }
            Err(e) => {
                debug!(error = %e, "Host listener stopped");
                break;
            }
        }
    }
}

async fn dispatch(port: Arc<dyn MessagePort>, service: Arc<dyn Service>, mut request: Request) {
    let args = std::mem::take(&mut request.args);

    let result = match AssertUnwindSafe(service.call(&request.method, args))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                channel = %request.channel,
                method = %request.method,
                %message,
                "Handler panicked"
            );
            Err(HandlerError::Panicked(message))
        }
    };

    let response = match result {
        Ok(body) => Response::success(&request, body),
        Err(err) => {
            debug!(
                channel = %request.channel,
                method = %request.method,
                error = %err,
                "Handler failed"
            );
            Response::error(&request, err.message())
        }
    };

    if let Err(e) = port.send(&response.into()).await {
        error!(id = %request.id, channel = %request.channel, error = %e, "Failed to post response");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic in handler: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic in handler: {s}")
    } else {
        "panic in handler".to_string()
    }
}
