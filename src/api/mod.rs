//! Channels spoken between the Lightspeed extension host and its webview.

pub mod chat;
pub mod lightspeed;

use crate::channel::Channel;

pub use self::chat::{ChatPrompt, ChatPromptService, ChatResponseInfo, PromptRunner, PromptSessions};
pub use self::lightspeed::{
    ContainerRuntime, LightspeedApi, LightspeedService, LightspeedState, LightspeedStateInfo,
    LightspeedStateManager,
};

// Requests from the webview to the host.
pub const API_LIGHTSPEED: Channel<dyn LightspeedApi> = Channel::new("LightspeedApi");
pub const API_CHAT: Channel<dyn ChatPrompt> = Channel::new("ChatPrompt");

// Broadcasts from the host to the webview.
pub const EVENT_LIGHTSPEED_STATE: Channel<LightspeedStateInfo> = Channel::new("LightspeedStateInfo");
pub const EVENT_CHAT_RESPONSE_DATA: Channel<ChatResponseInfo> = Channel::new("ChatResponseInfo");
