use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::args::IntoArgs;
use crate::channel::Channel;
use crate::error::{RpcError, RpcResult, TransportError};
use crate::message::{Message, Request, RequestId};
use crate::pending::PendingTable;
use crate::port::MessagePort;
use crate::subscribers::{Listener, SubscriberRegistry, Subscription};

/// How long a call waits for its response unless exempted.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Per-proxy options.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Methods that wait for their response indefinitely.
    pub no_timeout_methods: HashSet<String>,
}

impl ProxyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_timeout(mut self, method: impl Into<String>) -> Self {
        self.no_timeout_methods.insert(method.into());
        self
    }

    pub fn is_exempt(&self, method: &str) -> bool {
        self.no_timeout_methods.contains(method)
    }
}

struct ClientShared {
    port: Arc<dyn MessagePort>,
    counter: AtomicU64,
    pending: Arc<PendingTable>,
    subscribers: Arc<SubscriberRegistry>,
    config: ClientConfig,
    disposed: AtomicBool,
}

impl ClientShared {
    fn next_id(&self) -> RequestId {
        RequestId(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Forget every listener and reject every outstanding call. Calls made
    /// through surviving proxies afterwards fail at once.
    fn teardown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.subscribers.clear();

        let rejected = self.pending.drain();
        if rejected > 0 {
            debug!(rejected, "Rejected outstanding calls on teardown");
        }
    }
}

/// Client Invoker: the webview end of the bridge.
///
/// Issues requests through [`Proxy`] handles, correlates responses by id
/// and fans broadcasts out to listeners registered with [`RpcClient::on`].
pub struct RpcClient {
    shared: Arc<ClientShared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    pub fn new(port: impl MessagePort + 'static) -> Self {
        Self::with_config(port, ClientConfig::default())
    }

    pub fn with_config(port: impl MessagePort + 'static, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                port: Arc::new(port),
                counter: AtomicU64::new(0),
                pending: Arc::new(PendingTable::new()),
                subscribers: Arc::new(SubscriberRegistry::new()),
                config,
                disposed: AtomicBool::new(false),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Start consuming inbound messages. Calling it again replaces the
    /// listener.
    pub fn init(&self) {
        let handle = tokio::spawn(listen(self.shared.clone()));
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Proxy whose calls go to `channel`. Nothing is sent until a method is
    /// invoked.
    pub fn get_proxy<T: ?Sized>(&self, channel: &Channel<T>, options: ProxyOptions) -> Proxy<T> {
        Proxy {
            shared: self.shared.clone(),
            channel: channel.clone(),
            options: Arc::new(options),
        }
    }

    /// Call `listener` with every broadcast on `channel` from now on.
    ///
    /// Bodies that do not decode into `T` are logged and skipped.
    pub fn on<T, F>(&self, channel: &Channel<T>, listener: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = channel.name().to_string();
        let listener: Listener = Arc::new(move |body: &Value| match T::deserialize(body) {
            Ok(value) => listener(value),
            Err(e) => warn!(channel = %name, error = %e, "Broadcast body does not match channel type"),
        });
        self.shared.subscribers.subscribe(channel.name(), listener)
    }

    /// Listen on a channel by name, with the body left undecoded.
    pub fn on_raw(&self, channel: &str, listener: Listener) -> Subscription {
        self.shared.subscribers.subscribe(channel, listener)
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.shared.pending.contains(id)
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.shared.subscribers.listener_count(channel)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.port.is_connected()
    }

    /// Stop listening, forget every broadcast listener and reject every
    /// outstanding call with [`RpcError::ConnectionClosed`].
    ///
    /// Proxies obtained earlier keep working as handles but every call they
    /// make fails with [`RpcError::ConnectionClosed`]. Dropping the client
    /// does the same.
    pub fn dispose(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.shared.teardown();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    pub async fn close(&self) -> RpcResult<()> {
        self.dispose();
        self.shared.port.close().await?;
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
        self.shared.teardown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.shared.pending.len())
            .field("subscribers", &self.shared.subscribers)
            .field("listening", &self.listener.lock().is_some())
            .finish()
    }
}

/// Typed handle for calling the service bound to one channel.
///
/// Per-contract traits are implemented on `Proxy<dyn Contract>`; untyped
/// callers use [`Proxy::invoke`] or [`Proxy::call`] directly.
pub struct Proxy<T: ?Sized> {
    shared: Arc<ClientShared>,
    channel: Channel<T>,
    options: Arc<ProxyOptions>,
}

impl<T: ?Sized> Proxy<T> {
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Send `method(args)` and wait for its response.
    ///
    /// Waits for the client's default timeout unless `method` is exempted
    /// in this proxy's options.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        let timeout = if self.options.is_exempt(method) {
            None
        } else {
            Some(self.shared.config.default_timeout)
        };
        self.invoke_with_timeout(method, args, timeout).await
    }

    /// Like [`Proxy::invoke`] with an explicit window; `None` waits forever.
    pub async fn invoke_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> RpcResult<Value> {
        let id = self.shared.next_id();
        let call = self.shared.pending.register(id);
        // Checked after registering so a concurrent teardown either drains
        // this entry or is seen here.
        if self.shared.is_disposed() {
            return Err(RpcError::ConnectionClosed);
        }

        let request = Request::new(id, self.channel.name(), method, args);
        // On failure `call` is dropped here and takes its entry with it.
        self.shared.port.send(&request.into()).await?;

        let Some(window) = timeout else {
            return call.await;
        };

        match tokio::time::timeout(window, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    %id,
                    channel = self.channel.name(),
                    method,
                    "Request timed out"
                );
                Err(RpcError::Timeout(format!(
                    "Request {} timed out after {:?}",
                    id, window
                )))
            }
        }
    }

    /// Typed form of [`Proxy::invoke`].
    pub async fn call<A, R>(&self, method: &str, args: A) -> RpcResult<R>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        let args = args.into_args()?;
        let body = self.invoke(method, args).await?;
        Ok(serde_json::from_value(body)?)
    }
}

impl<T: ?Sized> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            channel: self.channel.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("channel", &self.channel)
            .field("options", &self.options)
            .finish()
    }
}

async fn listen(shared: Arc<ClientShared>) {
    loop {
        match shared.port.recv().await {
            Ok(Message::Response(response)) => {
                let id = response.id;
                if !shared.pending.settle(id, response.into_outcome()) {
                    debug!(%id, "Unknown message id");
                }
            }
            Ok(Message::Broadcast(broadcast)) => {
                if !shared.subscribers.dispatch(&broadcast.id, &broadcast.body) {
                    debug!(channel = %broadcast.id, "No listener for broadcast");
                }
            }
            Ok(message) => warn!(kind = message.kind(), "Received incompatible message"),
            Err(TransportError::Protocol(reason)) => {
                warn!(%reason, "Received incompatible message")
            }
            Err(e) => {
                debug!(error = %e, "Client listener stopped");
                break;
            }
        }
    }

    let rejected = shared.pending.drain();
    if rejected > 0 {
        debug!(rejected, "Rejected outstanding calls after transport ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::create_channel;
    use crate::error::HandlerError;
    use crate::host::{MethodTable, RpcHost};
    use crate::message::Response;
    use crate::port::FramedPort;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    trait Echo {}
    trait Math {}

    const ECHO: Channel<dyn Echo> = Channel::new("Echo");
    const MATH: Channel<dyn Math> = Channel::new("Math");

    fn bridge() -> (RpcHost, RpcClient) {
        let (host_end, webview_end) = MemoryTransport::pair("client-test");
        let host = RpcHost::new(FramedPort::new(host_end));
        let client = RpcClient::new(FramedPort::new(webview_end));
        host.init();
        client.init();
        (host, client)
    }

    /// Client wired to a raw port that the test drives by hand.
    fn manual() -> (RpcClient, FramedPort<MemoryTransport>) {
        let (host_end, webview_end) = MemoryTransport::pair("client-manual");
        let client = RpcClient::new(FramedPort::new(webview_end));
        client.init();
        (client, FramedPort::new(host_end))
    }

    async fn next_request(port: &FramedPort<MemoryTransport>) -> Request {
        match port.recv().await.unwrap() {
            Message::Request(request) => request,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (host, client) = bridge();
        host.register_instance(
            &ECHO,
            MethodTable::new().typed("echo", |(value,): (String,)| async move {
                Ok::<_, HandlerError>(value)
            }),
        );

        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());
        let reply: String = proxy.call("echo", ("a",)).await.unwrap();

        assert_eq!(reply, "a");
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_rejects_with_message() {
        let (host, client) = bridge();
        host.register_instance(
            &create_channel::<()>("Thrower"),
            MethodTable::new().method("fail", |_| async { Err(HandlerError::from("boom")) }),
        );

        let proxy = client.get_proxy(&create_channel::<()>("Thrower"), ProxyOptions::new());
        match proxy.invoke("fail", vec![]).await {
            Err(RpcError::Remote(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_correlated() {
        let (host, client) = bridge();
        host.register_instance(
            &MATH,
            MethodTable::new().typed("add", |(a, b): (i64, i64)| async move {
                Ok::<_, HandlerError>(a + b)
            }),
        );

        let proxy = client.get_proxy(&MATH, ProxyOptions::new());
        let (first, second) = tokio::join!(
            proxy.call::<_, i64>("add", (1, 2)),
            proxy.call::<_, i64>("add", (3, 4)),
        );

        assert_eq!(first.unwrap(), 3);
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&MATH, ProxyOptions::new());

        let first = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("slow", vec![]).await }
        });
        let first_request = next_request(&host_port).await;

        let second = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("fast", vec![]).await }
        });
        let second_request = next_request(&host_port).await;

        assert_eq!(first_request.id, RequestId(1));
        assert_eq!(second_request.id, RequestId(2));

        host_port
            .send(&Response::success(&second_request, json!("second")).into())
            .await
            .unwrap();
        host_port
            .send(&Response::success(&first_request, json!("first")).into())
            .await
            .unwrap();

        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let (_host, client) = bridge();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());

        let started = tokio::time::Instant::now();
        let result = proxy.invoke("echo", vec![json!("a")]).await;

        assert!(matches!(result, Err(RpcError::Timeout(_))));
        assert!(started.elapsed() >= DEFAULT_TIMEOUT);
        assert!(!client.is_pending(RequestId(1)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_ignored() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());

        let call = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("echo", vec![]).await }
        });
        let request = next_request(&host_port).await;

        assert!(matches!(call.await.unwrap(), Err(RpcError::Timeout(_))));

        host_port
            .send(&Response::success(&request, json!("too late")).into())
            .await
            .unwrap();

        // The client keeps working after discarding the stray response.
        let next = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("echo", vec![]).await }
        });
        let request = next_request(&host_port).await;
        assert_eq!(request.id, RequestId(2));
        host_port
            .send(&Response::success(&request, json!("on time")).into())
            .await
            .unwrap();

        assert_eq!(next.await.unwrap().unwrap(), json!("on time"));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timeout_methods_wait() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new().no_timeout("longRunning"));

        let call = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("longRunning", vec![]).await }
        });
        let request = next_request(&host_port).await;

        tokio::time::sleep(DEFAULT_TIMEOUT * 4).await;
        assert!(client.is_pending(request.id));

        host_port
            .send(&Response::success(&request, json!(42)).into())
            .await
            .unwrap();
        assert_eq!(call.await.unwrap().unwrap(), json!(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout() {
        let (_host_end, webview_end) = MemoryTransport::pair("configured");
        let client = RpcClient::with_config(
            FramedPort::new(webview_end),
            ClientConfig::new().with_default_timeout(Duration::from_millis(200)),
        );
        client.init();

        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());
        let started = tokio::time::Instant::now();
        assert!(matches!(
            proxy.invoke("echo", vec![]).await,
            Err(RpcError::Timeout(_))
        ));
        assert!(started.elapsed() < DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_ids_are_per_client() {
        let (first, first_port) = manual();
        let (second, second_port) = manual();

        let a = first.get_proxy(&ECHO, ProxyOptions::new());
        let b = second.get_proxy(&ECHO, ProxyOptions::new());
        let _ = tokio::spawn(async move { a.invoke("echo", vec![]).await });
        let _ = tokio::spawn(async move { b.invoke("echo", vec![]).await });

        assert_eq!(next_request(&first_port).await.id, RequestId(1));
        assert_eq!(next_request(&second_port).await.id, RequestId(1));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let (host, client) = bridge();
        let state: Channel<Value> = create_channel("State");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let subscription = client.on(&state, move |value: Value| {
            let _ = tx.send(value);
        });

        host.fire(&state, &json!({"status": "READY"})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"status": "READY"}));

        subscription.dispose();
        assert_eq!(client.listener_count("State"), 0);

        // Nobody listens any more; the client shrugs it off.
        host.fire(&state, &json!({"status": "ERROR"})).await.unwrap();
        host.register_instance(
            &ECHO,
            MethodTable::new().method("ping", |_| async { Ok(json!("pong")) }),
        );
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());
        assert_eq!(proxy.invoke("ping", vec![]).await.unwrap(), json!("pong"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mistyped_broadcast_is_skipped() {
        let (host, client) = bridge();
        let numbers: Channel<u32> = create_channel("Numbers");
        let loose: Channel<Value> = create_channel("Numbers");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let _subscription = client.on(&numbers, move |value: u32| {
            let _ = tx.send(value);
        });

        host.fire(&loose, &json!("not a number")).await.unwrap();
        host.fire(&numbers, &7).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dispose_rejects_outstanding_calls() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new().no_timeout("echo"));
        let _sub = client.on_raw("State", Arc::new(|_: &Value| {}));

        let call = tokio::spawn(async move { proxy.invoke("echo", vec![]).await });
        next_request(&host_port).await;

        client.dispose();
        assert!(matches!(call.await.unwrap(), Err(RpcError::ConnectionClosed)));
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(client.listener_count("State"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_client_rejects_outstanding_calls() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new().no_timeout("echo"));

        let call = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.invoke("echo", vec![]).await }
        });
        next_request(&host_port).await;

        drop(client);
        let settled = tokio::time::timeout(Duration::from_secs(3600), call)
            .await
            .expect("call left unsettled after the client was dropped");
        assert!(matches!(settled.unwrap(), Err(RpcError::ConnectionClosed)));

        // The surviving proxy no longer reaches anything.
        assert!(matches!(
            proxy.invoke("echo", vec![]).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_proxy_after_dispose_fails_fast() {
        let (client, _host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new().no_timeout("echo"));

        client.dispose();
        assert!(client.is_disposed());
        assert!(matches!(
            proxy.invoke("echo", vec![]).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_transport_end_rejects_outstanding_calls() {
        let (client, host_port) = manual();
        let proxy = client.get_proxy(&ECHO, ProxyOptions::new().no_timeout("echo"));

        let call = tokio::spawn(async move { proxy.invoke("echo", vec![]).await });
        next_request(&host_port).await;

        host_port.close().await.unwrap();
        drop(host_port);
        assert!(matches!(call.await.unwrap(), Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_send_failure_leaves_nothing_pending() {
        let (host_end, webview_end) = MemoryTransport::pair("closed");
        let client = RpcClient::new(FramedPort::new(webview_end));
        drop(host_end);

        let proxy = client.get_proxy(&ECHO, ProxyOptions::new());
        assert!(matches!(
            proxy.invoke("echo", vec![]).await,
            Err(RpcError::Transport(_))
        ));
        assert_eq!(client.pending_requests(), 0);
    }
}
