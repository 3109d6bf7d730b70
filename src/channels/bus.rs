//! Message bus trait and inbound message types.
//!
//! A bus is an adapter for one chat platform. It yields inbound messages as a
//! stream, decides whether a sender is allowed, and carries replies, proactive
//! posts, and status indicators back out.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::BusError;

/// Platform identity and routing data for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct BusContext {
    /// Platform name, e.g. "cli" or "telegram".
    pub platform: String,
    /// Stable sender identifier within the platform.
    pub user_id: String,
    pub user_name: Option<String>,
    /// Conversation the reply belongs in, if the platform has one.
    pub chat_id: Option<String>,
    /// Platform-specific data.
    pub metadata: serde_json::Value,
}

impl BusContext {
    pub fn new(platform: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            user_id: user_id.into(),
            user_name: None,
            chat_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Key used to map this identity to a durable session.
    pub fn identity_key(&self) -> String {
        format!("{}:{}", self.platform, self.user_id)
    }
}

/// A message received from a bus.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: Uuid,
    pub content: String,
    pub context: BusContext,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(context: BusContext, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            context,
            received_at: Utc::now(),
        }
    }
}

/// Stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Adapter for one chat platform.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Bus name, used in logs and by the `post_message` tool.
    fn name(&self) -> &str;

    /// Start listening. The stream ends when the bus stops.
    async fn start(&self) -> Result<MessageStream, BusError>;

    /// Whether this sender may talk to the assistant.
    fn is_allowed(&self, context: &BusContext) -> bool;

    /// Reply in the conversation a message came from.
    async fn reply(&self, content: &str, context: &BusContext) -> Result<(), BusError>;

    /// Post a proactive message, to `target` or the bus's default destination.
    async fn post(&self, content: &str, target: Option<&str>) -> Result<(), BusError>;

    /// Show a transient status (typing indicator and the like).
    async fn send_status(&self, _status: &str, _context: &BusContext) -> Result<(), BusError> {
        Ok(())
    }

    /// Clear a status shown by `send_status`.
    async fn clear_status(&self, _context: &BusContext) -> Result<(), BusError> {
        Ok(())
    }

    /// Stop listening.
    async fn stop(&self) -> Result<(), BusError> {
        Ok(())
    }
}
