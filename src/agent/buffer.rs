//! In-memory message window for a session.

use std::collections::HashSet;

use crate::llm::{ChatMessage, Role};

/// Result recorded for tool calls that never completed.
const INTERRUPTED_TOOL_RESULT: &str = "Error: interrupted before completion";

/// The messages a session sends to the LLM, bounded to `max_messages`.
///
/// The window never opens with a tool result, since its originating call
/// would have been trimmed away.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    messages: Vec<ChatMessage>,
    max_messages: usize,
}

impl MessageBuffer {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Rebuild from persisted history, keeping the most recent messages.
    pub fn from_history(history: Vec<ChatMessage>, max_messages: usize) -> Self {
        let mut buffer = Self::new(max_messages);
        buffer.messages = history;
        buffer.answer_dangling_tool_calls();
        buffer.trim();
        buffer
    }

    /// Add a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.trim();
    }

    /// Get all messages.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Last assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
        let orphaned = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::Tool)
            .count();
        self.messages.drain(..orphaned);
    }

    /// A crash between persisting a tool-call turn and its results leaves
    /// calls without answers, which providers reject. Answer them in memory.
    fn answer_dangling_tool_calls(&mut self) {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.tool_calls.is_some())
        else {
            return;
        };

        let answered: HashSet<&str> = self.messages[pos + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        let missing: Vec<ChatMessage> = self.messages[pos]
            .tool_calls
            .iter()
            .flatten()
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| ChatMessage::tool_result(&call.id, &call.name, INTERRUPTED_TOOL_RESULT))
            .collect();

        if missing.is_empty() {
            return;
        }
        let insert_at = pos
            + 1
            + self.messages[pos + 1..]
                .iter()
                .take_while(|m| m.role == Role::Tool)
                .count();
        self.messages.splice(insert_at..insert_at, missing);
    }
}
