use std::sync::Arc;
use webview_rpc::api::{
    API_LIGHTSPEED, ContainerRuntime, EVENT_LIGHTSPEED_STATE, LightspeedApi, LightspeedService,
    LightspeedStateManager,
};
use webview_rpc::{
    Channel, FramedPort, HandlerError, MemoryTransport, MethodTable, ProxyOptions, RpcClient,
    RpcHost, StateObject,
};

trait Math {}

const MATH: Channel<dyn Math> = Channel::new("Math");

struct LocalContainer;

#[async_trait::async_trait]
impl ContainerRuntime for LocalContainer {
    async fn ensure_started(&self) -> Result<(), String> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), String> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_end, webview_end) = MemoryTransport::pair("demo");

    // Host side
    let host = Arc::new(RpcHost::new(FramedPort::new(host_end)));
    host.register_instance(
        &MATH,
        MethodTable::new()
            .typed("add", |(a, b): (i64, i64)| async move {
                println!("[Host] add({}, {})", a, b);
                Ok::<_, HandlerError>(a + b)
            })
            .method("fail", |_| async { Err(HandlerError::from("boom")) }),
    );
    let manager = Arc::new(LightspeedStateManager::new(host.clone(), LocalContainer));
    host.register_instance(&API_LIGHTSPEED, LightspeedService(manager));
    host.init();

    // Webview side
    let client = RpcClient::new(FramedPort::new(webview_end));
    client.init();

    let math = client.get_proxy(&MATH, ProxyOptions::new());
    let (three, seven) = tokio::join!(
        math.call::<_, i64>("add", (1, 2)),
        math.call::<_, i64>("add", (3, 4)),
    );
    println!("[Webview] add results: {} and {}", three?, seven?);

    match math.invoke("fail", vec![]).await {
        Ok(value) => println!("[Webview] unexpected success: {}", value),
        Err(e) => println!("[Webview] fail() rejected with: {}", e),
    }

    let state = StateObject::new(&client, &EVENT_LIGHTSPEED_STATE);
    let _log = client.on(&EVENT_LIGHTSPEED_STATE, |info| {
        println!("[Webview] state broadcast: {:?}", info.status);
    });
    let lightspeed = client.get_proxy(&API_LIGHTSPEED, ProxyOptions::new());
    lightspeed.check().await?;
    println!("[Webview] last known state: {:?}", state.data());

    client.close().await?;
    host.close().await?;
    Ok(())
}
