//! Tool registry for a session.
//!
//! A registry is assembled once when a session starts and never changes
//! afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::context::ToolContext;
use crate::llm::ToolDefinition;
use crate::tools::tool::{Tool, ToolError};

/// Registry of the tools available to one session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Rejected duplicate tool registration");
            return Err(ToolError::Duplicate(name));
        }
        tracing::debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for LLM function calling, sorted by name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool and render its output as message content.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let start = Instant::now();
        let result = tool.execute(params, ctx).await;
        tracing::debug!(
            tool = %name,
            session = %ctx.session_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Tool finished"
        );
        result.map(|output| output.into_content())
    }
}
