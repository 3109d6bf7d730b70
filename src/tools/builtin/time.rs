//! Current time tool.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{Local, Utc};

use crate::context::ToolContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput};

/// Reports the current date and time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, both local and UTC, with the day of the week."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let local = Local::now();
        Ok(ToolOutput::success(
            serde_json::json!({
                "local": local.to_rfc3339(),
                "utc": Utc::now().to_rfc3339(),
                "weekday": local.format("%A").to_string(),
                "utc_offset": local.format("%:z").to_string(),
            }),
            start.elapsed(),
        ))
    }
}
