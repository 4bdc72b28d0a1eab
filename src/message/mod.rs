//! Wire envelopes. Three shapes share one transport and are told apart by
//! their fields alone.

pub mod types;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::types::{RequestId, Status};

/// A call from the webview to a method bound on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub channel: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// The single answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub channel: String,
    #[serde(default)]
    pub method: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unsolicited push; `id` is the channel name, not a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: String,
    pub body: Value,
}

/// Any envelope that can travel over the transport.
///
/// Variant order is the classification order: anything carrying `status`
/// is a response, anything with a numeric id and `method` is a request,
/// a string id with a body is a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Request(Request),
    Broadcast(Broadcast),
}

impl Request {
    pub fn new(
        id: RequestId,
        channel: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id,
            channel: channel.into(),
            method: method.into(),
            args,
        }
    }
}

impl Response {
    pub fn success(request: &Request, body: Value) -> Self {
        Self {
            id: request.id,
            channel: request.channel.clone(),
            method: request.method.clone(),
            status: Status::Success,
            body: Some(body),
            error: None,
        }
    }

    pub fn error(request: &Request, error: impl Into<String>) -> Self {
        Self {
            id: request.id,
            channel: request.channel.clone(),
            method: request.method.clone(),
            status: Status::Error,
            body: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the value a caller settles with.
    pub fn into_outcome(self) -> Result<Value, String> {
        match self.status {
            Status::Success => Ok(self.body.unwrap_or(Value::Null)),
            Status::Error => Err(self.error.unwrap_or_default()),
        }
    }
}

impl Broadcast {
    pub fn new(channel: impl Into<String>, body: Value) -> Self {
        Self {
            id: channel.into(),
            body,
        }
    }
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Response(_) => "response",
            Message::Request(_) => "request",
            Message::Broadcast(_) => "broadcast",
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<Broadcast> for Message {
    fn from(broadcast: Broadcast) -> Self {
        Message::Broadcast(broadcast)
    }
}
