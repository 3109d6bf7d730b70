//! Sub-agent dispatch tool.
//!
//! The task is queued as a JOB-mode job for the target agent like any other
//! work, so it is subject to that agent's concurrency limit. The calling
//! session waits for the sub-agent's final answer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::channels::LogFrontend;
use crate::context::ToolContext;
use crate::defs::{AgentDef, AgentLoader};
use crate::error::DefinitionError;
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_str};
use crate::worker::{Job, JobMode, JobQueue};

/// Hands a task to another agent and returns its answer.
pub struct DispatchTool {
    agent_id: String,
    agents: Arc<dyn AgentLoader>,
    queue: Arc<JobQueue>,
    description: String,
}

impl DispatchTool {
    /// Build the tool if any agent other than `agent_id` exists.
    pub async fn available(
        agent_id: &str,
        agents: Arc<dyn AgentLoader>,
        queue: Arc<JobQueue>,
    ) -> Option<Self> {
        let others: Vec<AgentDef> = match agents.discover().await {
            Ok(found) => found.into_iter().filter(|a| a.id != agent_id).collect(),
            Err(e) => {
                tracing::warn!("Failed to discover agents: {}", e);
                return None;
            }
        };
        if others.is_empty() {
            return None;
        }
        Some(Self {
            agent_id: agent_id.to_string(),
            description: describe(&others),
            agents,
            queue,
        })
    }
}

fn describe(agents: &[AgentDef]) -> String {
    let mut out = String::from(
        "Hand a self-contained task to another agent and wait for its answer. \
         Include everything the agent needs in the task text. Available agents:",
    );
    for agent in agents {
        out.push_str(&format!("\n- {}: {}", agent.id, agent.description));
    }
    out
}

#[async_trait]
impl Tool for DispatchTool {
    fn name(&self) -> &str {
        "dispatch_to_agent"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Id of the agent to hand the task to"
                },
                "task": {
                    "type": "string",
                    "description": "Complete description of the task"
                }
            },
            "required": ["agent_id", "task"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let target = require_str(&params, "agent_id")?;
        let task = require_str(&params, "task")?;

        if target == self.agent_id {
            return Err(ToolError::InvalidParameters(
                "an agent cannot dispatch to itself".to_string(),
            ));
        }
        match self.agents.load(target).await {
            Ok(_) => {}
            Err(DefinitionError::NotFound { .. }) | Err(DefinitionError::Invalid { .. }) => {
                return Err(ToolError::InvalidParameters(format!(
                    "no agent named '{}'",
                    target
                )));
            }
            Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
        }

        ctx.frontend.on_dispatch(target, task).await;
        tracing::info!(
            agent = %ctx.agent_id,
            session = %ctx.session_id,
            target_agent = %target,
            "Dispatching task to sub-agent"
        );

        let frontend = Arc::new(LogFrontend::new(format!("{}<-{}", target, ctx.agent_id)));
        let (job, rx) = Job::new(target, task, frontend, JobMode::Job).awaiting();
        self.queue.push(job);

        let outcome = rx.await;
        ctx.frontend.on_dispatch_complete(target).await;

        match outcome {
            Ok(Ok(answer)) => Ok(ToolOutput::text(answer, start.elapsed())),
            Ok(Err(reason)) => Err(ToolError::ExecutionFailed(format!(
                "agent '{}' failed: {}",
                target, reason
            ))),
            Err(_) => Err(ToolError::ExecutionFailed(format!(
                "agent '{}' job was abandoned",
                target
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::MemoryDefinitions;
    use std::time::Duration;

    fn agents() -> Arc<dyn AgentLoader> {
        Arc::new(MemoryDefinitions::with([
            AgentDef::new("assistant", "p"),
            AgentDef::new("researcher", "p").with_description("Digs things up"),
        ]))
    }

    #[tokio::test]
    async fn unavailable_when_alone() {
        let only: Arc<dyn AgentLoader> =
            Arc::new(MemoryDefinitions::with([AgentDef::new("assistant", "p")]));
        assert!(
            DispatchTool::available("assistant", only, Arc::new(JobQueue::new()))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn refuses_self_and_unknown() {
        let tool = DispatchTool::available("assistant", agents(), Arc::new(JobQueue::new()))
            .await
            .unwrap();
        assert!(tool.description().contains("researcher: Digs things up"));
        assert!(!tool.description().contains("- assistant"));

        let ctx = ToolContext::detached("assistant", "s");
        let err = tool
            .execute(serde_json::json!({"agent_id": "assistant", "task": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));

        let err = tool
            .execute(serde_json::json!({"agent_id": "ghost", "task": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn queues_job_and_returns_answer() {
        let queue = Arc::new(JobQueue::new());
        let tool = DispatchTool::available("assistant", agents(), Arc::clone(&queue))
            .await
            .unwrap();

        let q = Arc::clone(&queue);
        let responder = tokio::spawn(async move {
            let mut job = q.pop().await;
            assert_eq!(job.agent_id, "researcher");
            assert_eq!(job.mode, JobMode::Job);
            assert!(job.session_id.is_none());
            job.resolve(Ok(format!("answer to {}", job.message)));
        });

        let ctx = ToolContext::detached("assistant", "s");
        let out = tokio::time::timeout(
            Duration::from_secs(1),
            tool.execute(
                serde_json::json!({"agent_id": "researcher", "task": "find x"}),
                &ctx,
            ),
        )
        .await
        .unwrap()
        .unwrap();
        responder.await.unwrap();
        assert_eq!(out.into_content(), "answer to find x");
    }
}
