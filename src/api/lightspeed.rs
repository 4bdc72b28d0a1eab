use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::EVENT_LIGHTSPEED_STATE;
use crate::client::Proxy;
use crate::error::{HandlerError, RpcError, RpcResult};
use crate::host::{RpcHost, Service};
use crate::state::StatePublisher;

const ENTITLEMENT_MISSING: &str = "Entitlement not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LightspeedState {
    Initializing,
    Starting,
    Ready,
    Error,
    ErrorEntitlement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightspeedStateInfo {
    pub status: LightspeedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LightspeedStateInfo {
    pub fn new(status: LightspeedState) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// Failed state carrying `error`. A missing entitlement gets its own
    /// status so the view can point the user at subscription setup.
    pub fn from_error(error: impl Into<String>) -> Self {
        let error = error.into();
        let status = if error.contains(ENTITLEMENT_MISSING) {
            LightspeedState::ErrorEntitlement
        } else {
            LightspeedState::Error
        };
        Self {
            status,
            error: Some(error),
        }
    }
}

/// Lifecycle control of the assistant backend.
///
/// Host implementations report failures as [`RpcError::Remote`] with the
/// text the webview should see.
#[async_trait]
pub trait LightspeedApi: Send + Sync {
    /// Broadcast the current state again.
    async fn init_states(&self) -> RpcResult<()>;

    /// Bring the backend up and broadcast each state it passes through.
    async fn check(&self) -> RpcResult<()>;

    async fn restart(&self) -> RpcResult<()>;
}

#[async_trait]
impl LightspeedApi for Proxy<dyn LightspeedApi> {
    async fn init_states(&self) -> RpcResult<()> {
        self.call("initStates", ()).await
    }

    async fn check(&self) -> RpcResult<()> {
        self.call("check", ()).await
    }

    async fn restart(&self) -> RpcResult<()> {
        self.call("restart", ()).await
    }
}

/// Binds a [`LightspeedApi`] implementation to its wire method names.
pub struct LightspeedService<S: ?Sized>(pub Arc<S>);

#[async_trait]
impl<S: LightspeedApi + ?Sized + 'static> Service for LightspeedService<S> {
    async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, HandlerError> {
        match method {
            "initStates" => self.0.init_states().await?,
            "check" => self.0.check().await?,
            "restart" => self.0.restart().await?,
            other => return Err(HandlerError::UnknownMethod(other.to_string())),
        }
        Ok(Value::Null)
    }
}

/// The container the assistant runs in.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure the container exists and is running.
    async fn ensure_started(&self) -> Result<(), String>;

    async fn restart(&self) -> Result<(), String>;
}

/// Host-side [`LightspeedApi`]: drives the container and publishes its
/// state on [`EVENT_LIGHTSPEED_STATE`].
pub struct LightspeedStateManager<C> {
    runtime: C,
    state: StatePublisher<LightspeedStateInfo>,
}

impl<C: ContainerRuntime> LightspeedStateManager<C> {
    pub fn new(host: Arc<RpcHost>, runtime: C) -> Self {
        Self {
            runtime,
            state: StatePublisher::new(host, EVENT_LIGHTSPEED_STATE),
        }
    }

    pub fn current(&self) -> Option<LightspeedStateInfo> {
        self.state.current()
    }

    /// Initializing, then Starting once the container runs, then Ready or
    /// an error state.
    pub async fn start(&self) -> RpcResult<()> {
        self.state
            .publish(LightspeedStateInfo::new(LightspeedState::Initializing))
            .await?;

        if let Err(error) = self.runtime.ensure_started().await {
            warn!(%error, "Lightspeed container did not start");
            return self.state.publish(LightspeedStateInfo::from_error(error)).await;
        }

        self.state
            .publish(LightspeedStateInfo::new(LightspeedState::Starting))
            .await?;
        self.check_and_broadcast().await
    }

    /// Check the container again, for instance after it was removed.
    /// Does nothing before the first [`start`](Self::start).
    pub async fn check_and_broadcast(&self) -> RpcResult<()> {
        if self.state.current().is_none() {
            return Ok(());
        }

        let next = match self.runtime.ensure_started().await {
            Ok(()) => LightspeedStateInfo::new(LightspeedState::Ready),
            Err(error) => {
                warn!(%error, "Lightspeed container check failed");
                LightspeedStateInfo::from_error(error)
            }
        };
        self.state.publish(next).await
    }

    pub fn dispose(&self) {
        self.state.clear();
    }
}

#[async_trait]
impl<C: ContainerRuntime> LightspeedApi for LightspeedStateManager<C> {
    async fn init_states(&self) -> RpcResult<()> {
        self.state.rebroadcast().await?;
        Ok(())
    }

    async fn check(&self) -> RpcResult<()> {
        self.start().await
    }

    async fn restart(&self) -> RpcResult<()> {
        self.runtime.restart().await.map_err(RpcError::Remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::API_LIGHTSPEED;
    use crate::client::{ProxyOptions, RpcClient};
    use crate::port::FramedPort;
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ScriptedRuntime {
        starts: Mutex<VecDeque<Result<(), String>>>,
        restart_error: Option<String>,
    }

    impl ScriptedRuntime {
        fn with_starts(starts: Vec<Result<(), String>>) -> Self {
            Self {
                starts: Mutex::new(starts.into()),
                restart_error: None,
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn ensure_started(&self) -> Result<(), String> {
            self.starts.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn restart(&self) -> Result<(), String> {
            match &self.restart_error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }
    }

    struct Fixture {
        client: RpcClient,
        _host: Arc<RpcHost>,
        proxy: Proxy<dyn LightspeedApi>,
        states: mpsc::UnboundedReceiver<LightspeedStateInfo>,
        _subscription: crate::subscribers::Subscription,
    }

    fn fixture(runtime: ScriptedRuntime) -> Fixture {
        let (host_end, webview_end) = MemoryTransport::pair("lightspeed");
        let host = Arc::new(RpcHost::new(FramedPort::new(host_end)));
        let client = RpcClient::new(FramedPort::new(webview_end));

        let manager = Arc::new(LightspeedStateManager::new(host.clone(), runtime));
        host.register_instance(&API_LIGHTSPEED, LightspeedService(manager));
        host.init();
        client.init();

        let (tx, states) = mpsc::unbounded_channel();
        let subscription = client.on(&EVENT_LIGHTSPEED_STATE, move |info| {
            let _ = tx.send(info);
        });
        let proxy = client.get_proxy(&API_LIGHTSPEED, ProxyOptions::new());

        Fixture {
            client,
            _host: host,
            proxy,
            states,
            _subscription: subscription,
        }
    }

    fn drain(states: &mut mpsc::UnboundedReceiver<LightspeedStateInfo>) -> Vec<LightspeedState> {
        let mut seen = Vec::new();
        while let Ok(info) = states.try_recv() {
            seen.push(info.status);
        }
        seen
    }

    #[test]
    fn test_wire_shape() {
        let info = LightspeedStateInfo::new(LightspeedState::Ready);
        assert_eq!(serde_json::to_value(&info).unwrap(), json!({"status": "READY"}));

        let info: LightspeedStateInfo = serde_json::from_value(json!({
            "status": "ERROR_ENTITLEMENT",
            "error": "Entitlement not found"
        }))
        .unwrap();
        assert_eq!(info.status, LightspeedState::ErrorEntitlement);
    }

    #[test]
    fn test_from_error_classifies_entitlement() {
        let info = LightspeedStateInfo::from_error("Error: Entitlement not found in /etc/pki");
        assert_eq!(info.status, LightspeedState::ErrorEntitlement);

        let info = LightspeedStateInfo::from_error("No started podman engine found");
        assert_eq!(info.status, LightspeedState::Error);
        assert_eq!(info.error.as_deref(), Some("No started podman engine found"));
    }

    #[tokio::test]
    async fn test_check_walks_through_states() {
        let mut fx = fixture(ScriptedRuntime::default());

        fx.proxy.check().await.unwrap();

        // Broadcasts precede the response on the same pipe.
        assert_eq!(
            drain(&mut fx.states),
            vec![
                LightspeedState::Initializing,
                LightspeedState::Starting,
                LightspeedState::Ready
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_start_reports_error() {
        let mut fx = fixture(ScriptedRuntime::with_starts(vec![Err(
            "Entitlement not found".into(),
        )]));

        fx.proxy.check().await.unwrap();
        assert_eq!(
            drain(&mut fx.states),
            vec![LightspeedState::Initializing, LightspeedState::ErrorEntitlement]
        );
    }

    #[tokio::test]
    async fn test_init_states_rebroadcasts() {
        let mut fx = fixture(ScriptedRuntime::default());

        fx.proxy.init_states().await.unwrap();
        assert!(drain(&mut fx.states).is_empty());

        fx.proxy.check().await.unwrap();
        drain(&mut fx.states);

        fx.proxy.init_states().await.unwrap();
        assert_eq!(drain(&mut fx.states), vec![LightspeedState::Ready]);
    }

    #[tokio::test]
    async fn test_restart_failure_reaches_caller() {
        let fx = fixture(ScriptedRuntime {
            restart_error: Some("Podman extension not found".into()),
            ..Default::default()
        });

        match fx.proxy.restart().await {
            Err(RpcError::Remote(message)) => assert_eq!(message, "Podman extension not found"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(fx.client.pending_requests(), 0);
    }
}
