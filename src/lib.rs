//! webview-rpc - request/response and broadcast messaging between a host
//! context and the sandboxed webview it embeds, over one message pipe.
pub mod api;
pub mod args;
pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod host;
pub mod message;
mod pending;
pub mod port;
pub mod session;
pub mod state;
pub mod subscribers;
pub mod transport;

pub use args::{FromArgs, IntoArgs};
pub use channel::{Channel, create_channel};
pub use client::{ClientConfig, DEFAULT_TIMEOUT, Proxy, ProxyOptions, RpcClient};
#[cfg(feature = "codec-cbor")]
pub use codec::CborCodec;
#[cfg(feature = "codec-messagepack")]
pub use codec::MessagePackCodec;
pub use codec::{Codec, JsonCodec};
pub use error::{HandlerError, RpcError, RpcResult, TransportError, TransportResult};
pub use host::{MethodTable, RpcHost, Service};
pub use message::{Broadcast, Message, Request, RequestId, Response, Status};
pub use port::{FramedPort, MessagePort};
pub use session::{ResponseSessions, SessionEvent, SessionSubscription};
pub use state::{StateObject, StatePublisher};
pub use subscribers::{Listener, SubscriberRegistry, Subscription};
pub use transport::{FrameTransport, MemoryTransport, TransportStats};
