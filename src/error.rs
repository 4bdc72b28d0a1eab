use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Error text produced by a handler on the other side.
    #[error("{0}")]
    Remote(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Transport closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failure raised by a bound service, tagged by where it came from.
///
/// This is the only shape a handler failure takes before it is flattened
/// into the `error` string of a response.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Value(Value),

    #[error("{0}")]
    Panicked(String),

    #[error("Method not found: {0}")]
    UnknownMethod(String),
}

impl HandlerError {
    pub fn failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Failed(Box::new(err))
    }

    /// Text carried by the error response.
    pub fn message(&self) -> String {
        match self {
            HandlerError::Message(msg) | HandlerError::Panicked(msg) => msg.clone(),
            // A bare JSON string is already text; anything else is its JSON form.
            HandlerError::Value(Value::String(s)) => s.clone(),
            other => other.to_string(),
        }
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::failed(err)
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(msg) => HandlerError::Message(msg),
            other => HandlerError::failed(other),
        }
    }
}
