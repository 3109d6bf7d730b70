//! Shared runtime context and per-call tool context.

use std::sync::Arc;

use crate::agent::SessionMap;
use crate::channels::{Frontend, LogFrontend, MessageBus};
use crate::config::RuntimeConfig;
use crate::defs::{AgentLoader, CronLoader, SkillLoader};
use crate::history::HistoryStore;
use crate::llm::LlmFactory;
use crate::worker::{JobMode, JobQueue};

/// Everything the workers share. Built once at boot and passed explicitly.
pub struct RuntimeContext {
    pub config: RuntimeConfig,
    pub history: Arc<HistoryStore>,
    pub agents: Arc<dyn AgentLoader>,
    pub crons: Arc<dyn CronLoader>,
    pub skills: Arc<dyn SkillLoader>,
    pub llm: Arc<dyn LlmFactory>,
    pub queue: Arc<JobQueue>,
    pub session_map: Arc<SessionMap>,
    pub buses: Vec<Arc<dyn MessageBus>>,
}

/// What a tool knows about the session calling it.
#[derive(Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub session_id: String,
    pub mode: JobMode,
    pub frontend: Arc<dyn Frontend>,
}

impl ToolContext {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        mode: JobMode,
        frontend: Arc<dyn Frontend>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            mode,
            frontend,
        }
    }

    /// Context with output going to the log.
    pub fn detached(agent_id: &str, session_id: &str) -> Self {
        Self::new(
            agent_id,
            session_id,
            JobMode::Chat,
            Arc::new(LogFrontend::new(agent_id)),
        )
    }
}
