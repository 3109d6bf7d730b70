//! Proactive message tool, offered to JOB-mode sessions only.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::channels::MessageBus;
use crate::context::ToolContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str, require_str};

/// Posts a message to a chat platform without a user prompt.
pub struct PostMessageTool {
    buses: Vec<Arc<dyn MessageBus>>,
    description: String,
}

impl PostMessageTool {
    /// Build the tool if at least one bus is enabled.
    pub fn available(buses: &[Arc<dyn MessageBus>]) -> Option<Self> {
        if buses.is_empty() {
            return None;
        }
        let names: Vec<&str> = buses.iter().map(|b| b.name()).collect();
        Some(Self {
            description: format!(
                "Send a message to the user on a chat platform. Use this to report \
                 results of background work. Buses: {} (default: {}).",
                names.join(", "),
                names[0]
            ),
            buses: buses.to_vec(),
        })
    }
}

#[async_trait]
impl Tool for PostMessageTool {
    fn name(&self) -> &str {
        "post_message"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "Message text"
                },
                "bus": {
                    "type": "string",
                    "description": "Bus to post on (defaults to the first one)"
                },
                "target": {
                    "type": "string",
                    "description": "Platform-specific destination, e.g. a chat id"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let content = require_str(&params, "content")?;
        let target = optional_str(&params, "target");

        let bus = match optional_str(&params, "bus") {
            Some(name) => self
                .buses
                .iter()
                .find(|b| b.name() == name)
                .ok_or_else(|| ToolError::InvalidParameters(format!("no bus named '{}'", name)))?,
            None => self
                .buses
                .first()
                .ok_or_else(|| ToolError::ExecutionFailed("no bus configured".to_string()))?,
        };

        bus.post(content, target)
            .await
            .map_err(|e| ToolError::ExternalService(e.to_string()))?;

        tracing::info!(agent = %ctx.agent_id, bus = %bus.name(), "Posted proactive message");
        Ok(ToolOutput::text(
            format!("Message posted to {}", bus.name()),
            start.elapsed(),
        ))
    }
}
