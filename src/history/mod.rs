//! Durable conversation history.
//!
//! On disk a history root holds one `index.jsonl` of [`HistorySession`]
//! records and a `sessions/<id>.jsonl` log of [`HistoryMessage`] lines per
//! session. Both are newline-delimited JSON.

mod store;

pub use store::HistoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role, ToolCall};

/// Longest auto-derived title before truncation.
pub const TITLE_MAX_CHARS: usize = 50;

/// Metadata for one durable session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySession {
    pub id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistorySession {
    pub(crate) fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            title: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
    Tool,
}

impl From<Role> for HistoryRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => HistoryRole::User,
            Role::Assistant => HistoryRole::Assistant,
            Role::System => HistoryRole::System,
            Role::Tool => HistoryRole::Tool,
        }
    }
}

impl From<HistoryRole> for Role {
    fn from(role: HistoryRole) -> Self {
        match role {
            HistoryRole::User => Role::User,
            HistoryRole::Assistant => Role::Assistant,
            HistoryRole::System => Role::System,
            HistoryRole::Tool => Role::Tool,
        }
    }
}

/// Function half of a persisted tool call. Arguments stay a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: HistoryFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// One persisted turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub timestamp: DateTime<Utc>,
    pub role: HistoryRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<HistoryToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::from(&ChatMessage::user(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::from(&ChatMessage::assistant(content))
    }
}

impl From<&ChatMessage> for HistoryMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            timestamp: Utc::now(),
            role: msg.role.into(),
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| HistoryToolCall {
                        id: tc.id.clone(),
                        call_type: function_type(),
                        function: HistoryFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }
}

impl From<&HistoryMessage> for ChatMessage {
    fn from(msg: &HistoryMessage) -> Self {
        ChatMessage {
            role: msg.role.into(),
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: serde_json::from_str(&tc.function.arguments).unwrap_or_else(
                            |_| serde_json::Value::String(tc.function.arguments.clone()),
                        ),
                    })
                    .collect()
            }),
        }
    }
}

/// Title derived from the first user message: its first 50 characters,
/// taken as-is, with `...` appended when anything was cut.
pub fn derive_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
