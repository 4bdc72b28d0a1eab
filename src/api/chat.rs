use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use super::EVENT_CHAT_RESPONSE_DATA;
use crate::args::FromArgs;
use crate::client::Proxy;
use crate::error::{HandlerError, RpcResult};
use crate::host::{RpcHost, Service};
use crate::session::SessionEvent;

/// The answer to one prompt session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponseInfo {
    pub id: u64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionEvent for ChatResponseInfo {
    fn session_id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
pub trait ChatPrompt: Send + Sync {
    /// Start answering `message`. Returns the session id at once; the
    /// answer follows as a [`ChatResponseInfo`] broadcast with that id.
    async fn create_prompt_session(&self, message: String) -> RpcResult<u64>;
}

#[async_trait]
impl ChatPrompt for Proxy<dyn ChatPrompt> {
    async fn create_prompt_session(&self, message: String) -> RpcResult<u64> {
        self.call("createPromptSession", (message,)).await
    }
}

/// Binds a [`ChatPrompt`] implementation to its wire method names.
pub struct ChatPromptService<S: ?Sized>(pub Arc<S>);

#[async_trait]
impl<S: ChatPrompt + ?Sized + 'static> Service for ChatPromptService<S> {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        match method {
            "createPromptSession" => {
                let (message,): (String,) = FromArgs::from_args(args)?;
                let session_id = self.0.create_prompt_session(message).await?;
                Ok(Value::from(session_id))
            }
            other => Err(HandlerError::UnknownMethod(other.to_string())),
        }
    }
}

/// Whatever turns a prompt into an answer.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run(&self, prompt: &str) -> Result<String, String>;
}

/// Host-side [`ChatPrompt`]: numbers sessions from 0 and answers each one
/// in the background.
pub struct PromptSessions<R> {
    host: Arc<RpcHost>,
    runner: Arc<R>,
    next_session: AtomicU64,
}

impl<R: PromptRunner + 'static> PromptSessions<R> {
    pub fn new(host: Arc<RpcHost>, runner: R) -> Self {
        Self {
            host,
            runner: Arc::new(runner),
            next_session: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<R: PromptRunner + 'static> ChatPrompt for PromptSessions<R> {
    async fn create_prompt_session(&self, message: String) -> RpcResult<u64> {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let host = self.host.clone();
        let runner = self.runner.clone();

        tokio::spawn(async move {
            let info = match runner.run(&message).await {
                Ok(output) => {
                    debug!(session_id, bytes = output.len(), "Prompt answered");
                    ChatResponseInfo {
                        id: session_id,
                        content: sanitize_output(&output),
                        error: None,
                    }
                }
                Err(error) => {
                    error!(session_id, %error, "Prompt failed");
                    ChatResponseInfo {
                        id: session_id,
                        content: String::new(),
                        error: Some(error),
                    }
                }
            };

            if let Err(e) = host.fire(&EVENT_CHAT_RESPONSE_DATA, &info).await {
                error!(session_id, error = %e, "Failed to broadcast chat response");
            }
        });

        Ok(session_id)
    }
}

/// Escape `#` so markdown does not read it as a heading, and strip stray
/// backticks.
pub fn sanitize_output(raw: &str) -> String {
    raw.replace('#', "\\#").replace('`', "")
}
