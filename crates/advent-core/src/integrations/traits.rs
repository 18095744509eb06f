use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::calendar::{Payload, RequesterId};
use crate::error::TransportError;

/// Conversation a reply goes to. For private chats it equals the
/// requester's id; in groups it is the group's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    pub requester: RequesterId,
    pub chat: ChatId,
    pub text: String,
    /// Display name, for logs only.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl InboundRequest {
    pub fn new(requester: RequesterId, chat: ChatId, text: impl Into<String>) -> Self {
        Self {
            requester,
            chat,
            text: text.into(),
            display_name: None,
        }
    }
}

/// Outbound side of a chat platform. The engine only calls this and
/// reacts to the result; connection handling, authentication and
/// network-level retries belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique identifier (e.g. "telegram").
    fn name(&self) -> &str;

    /// Send every part of `payload` to `chat`, in order. Success means the
    /// platform acknowledged all parts.
    async fn send_message(&self, chat: ChatId, payload: &Payload) -> Result<(), TransportError>;
}
