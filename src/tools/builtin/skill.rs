//! Skill loading tool.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::ToolContext;
use crate::defs::{SkillDef, SkillLoader};
use crate::error::DefinitionError;
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_str};

/// Pulls a skill's instructions into the conversation.
pub struct LoadSkillTool {
    skills: Arc<dyn SkillLoader>,
    description: String,
}

impl LoadSkillTool {
    /// Build the tool if at least one skill exists.
    pub async fn available(skills: Arc<dyn SkillLoader>) -> Option<Self> {
        let found = match skills.discover().await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Failed to discover skills: {}", e);
                return None;
            }
        };
        if found.is_empty() {
            return None;
        }
        Some(Self {
            description: describe(&found),
            skills,
        })
    }
}

fn describe(skills: &[SkillDef]) -> String {
    let mut out = String::from(
        "Load the full instructions for a skill before doing a task it covers. Available skills:",
    );
    for skill in skills {
        out.push_str(&format!("\n- {}: {}", skill.id, skill.description));
    }
    out
}

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        "load_skill"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {
                    "type": "string",
                    "description": "Id of the skill to load"
                }
            },
            "required": ["skill_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let skill_id = require_str(&params, "skill_id")?;

        let skill = self.skills.load(skill_id).await.map_err(|e| match e {
            DefinitionError::NotFound { .. } | DefinitionError::Invalid { .. } => {
                ToolError::InvalidParameters(format!("no skill named '{}'", skill_id))
            }
            other => ToolError::ExecutionFailed(other.to_string()),
        })?;

        Ok(ToolOutput::text(skill.content, start.elapsed()))
    }
}
