//! Built-in tools and per-session tool assembly.

pub mod dispatch;
pub mod post;
pub mod skill;
pub mod time;

pub use dispatch::DispatchTool;
pub use post::PostMessageTool;
pub use skill::LoadSkillTool;
pub use time::CurrentTimeTool;

use std::sync::Arc;

use crate::context::RuntimeContext;
use crate::defs::AgentDef;
use crate::tools::{Tool, ToolRegistry};
use crate::worker::JobMode;

/// Assemble the fixed tool set for a new session.
///
/// Base tools are always present. Each optional tool is offered only when
/// its precondition holds:
/// - `load_skill`: the agent allows skills and at least one skill exists
/// - `dispatch_to_agent`: some other agent is defined
/// - `post_message`: JOB mode and at least one bus is enabled
pub async fn build_session_tools(
    def: &AgentDef,
    mode: JobMode,
    ctx: &RuntimeContext,
) -> ToolRegistry {
    let mut optional: Vec<Option<Arc<dyn Tool>>> = vec![Some(Arc::new(CurrentTimeTool))];

    optional.push(if def.allow_skills {
        LoadSkillTool::available(Arc::clone(&ctx.skills))
            .await
            .map(|t| Arc::new(t) as Arc<dyn Tool>)
    } else {
        None
    });

    optional.push(
        DispatchTool::available(&def.id, Arc::clone(&ctx.agents), Arc::clone(&ctx.queue))
            .await
            .map(|t| Arc::new(t) as Arc<dyn Tool>),
    );

    optional.push(if mode == JobMode::Job {
        PostMessageTool::available(&ctx.buses).map(|t| Arc::new(t) as Arc<dyn Tool>)
    } else {
        None
    });

    let mut registry = ToolRegistry::new();
    for tool in optional.into_iter().flatten() {
        if let Err(e) = registry.register(tool) {
            tracing::warn!(agent = %def.id, "Skipping tool: {}", e);
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{CliBus, MessageBus};
    use crate::defs::{MemoryDefinitions, SkillDef};
    use crate::test_support::TestRuntime;

    #[tokio::test]
    async fn chat_mode_alone_gets_base_tools() {
        let rt = TestRuntime::new(vec![AgentDef::new("solo", "p")]).await;
        let def = AgentDef::new("solo", "p");
        let tools = build_session_tools(&def, JobMode::Chat, &rt.ctx).await;
        assert_eq!(tools.names(), vec!["current_time"]);
    }

    #[tokio::test]
    async fn optional_tools_follow_preconditions() {
        let bus: Arc<dyn MessageBus> = Arc::new(CliBus::new());
        let rt = TestRuntime::builder(vec![
            AgentDef::new("assistant", "p"),
            AgentDef::new("researcher", "p"),
        ])
        .skills(MemoryDefinitions::with([SkillDef::new("s", "d", "c")]))
        .buses(vec![bus])
        .build()
        .await;

        let mut def = AgentDef::new("assistant", "p");
        let chat = build_session_tools(&def, JobMode::Chat, &rt.ctx).await;
        assert_eq!(chat.names(), vec!["current_time", "dispatch_to_agent"]);

        def.allow_skills = true;
        let job = build_session_tools(&def, JobMode::Job, &rt.ctx).await;
        assert_eq!(
            job.names(),
            vec!["current_time", "dispatch_to_agent", "load_skill", "post_message"]
        );
    }
}
