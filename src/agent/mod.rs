//! Agents, their sessions, and the chat-side plumbing around them.

pub mod buffer;
pub mod commands;
pub mod session;
pub mod session_map;

pub use buffer::MessageBuffer;
pub use commands::{Command, CommandRegistry};
pub use session::AgentSession;
pub use session_map::{SessionBinding, SessionMap};

use std::sync::Arc;

use uuid::Uuid;

use crate::context::RuntimeContext;
use crate::defs::AgentDef;
use crate::error::{Error, HistoryError};
use crate::llm::{ChatMessage, LlmProvider};
use crate::tools::build_session_tools;
use crate::worker::JobMode;

/// A resolved agent definition plus the LLM client built from it.
pub struct Agent {
    def: AgentDef,
    llm: Arc<dyn LlmProvider>,
    ctx: Arc<RuntimeContext>,
}

impl Agent {
    /// Build an agent from a definition.
    pub fn new(def: AgentDef, ctx: Arc<RuntimeContext>) -> Result<Arc<Self>, Error> {
        let llm = ctx.llm.build(&def)?;
        Ok(Arc::new(Self { def, llm, ctx }))
    }

    /// Load the definition for `agent_id` and build the agent.
    ///
    /// Fails with a definition `NotFound` error if the agent no longer exists.
    pub async fn load(agent_id: &str, ctx: Arc<RuntimeContext>) -> Result<Arc<Self>, Error> {
        let def = ctx.agents.load(agent_id).await?;
        Self::new(def, ctx)
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn def(&self) -> &AgentDef {
        &self.def
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub(crate) fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    fn max_history(&self, mode: JobMode) -> usize {
        match mode {
            JobMode::Chat => self.ctx.config.chat_max_history,
            JobMode::Job => self.ctx.config.job_max_history,
        }
    }

    /// Start a session. A given `session_id` is reused, otherwise a new one is minted.
    pub async fn new_session(
        self: &Arc<Self>,
        mode: JobMode,
        session_id: Option<String>,
    ) -> Result<AgentSession, Error> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.ctx
            .history
            .create_session(&self.def.id, &session_id)
            .await?;

        let tools = build_session_tools(&self.def, mode, &self.ctx).await;
        tracing::debug!(
            agent = %self.def.id,
            session = %session_id,
            mode = %mode,
            tools = tools.len(),
            "Started session"
        );

        Ok(AgentSession::new(
            Arc::clone(self),
            session_id,
            mode,
            tools,
            MessageBuffer::new(self.max_history(mode)),
        ))
    }

    /// Resume a session in CHAT mode.
    pub async fn resume_session(self: &Arc<Self>, session_id: &str) -> Result<AgentSession, Error> {
        self.resume_session_as(session_id, JobMode::Chat).await
    }

    /// Resume a session, rehydrating its recent history.
    ///
    /// Fails with `HistoryError::SessionNotFound` if the store has no such session.
    pub async fn resume_session_as(
        self: &Arc<Self>,
        session_id: &str,
        mode: JobMode,
    ) -> Result<AgentSession, Error> {
        if self.ctx.history.get_session(session_id).await.is_none() {
            return Err(HistoryError::SessionNotFound {
                id: session_id.to_string(),
            }
            .into());
        }

        let history: Vec<ChatMessage> = self
            .ctx
            .history
            .get_messages(session_id)
            .await?
            .iter()
            .map(ChatMessage::from)
            .collect();
        let buffer = MessageBuffer::from_history(history, self.max_history(mode));

        let tools = build_session_tools(&self.def, mode, &self.ctx).await;
        tracing::debug!(
            agent = %self.def.id,
            session = %session_id,
            mode = %mode,
            messages = buffer.len(),
            "Resumed session"
        );

        Ok(AgentSession::new(
            Arc::clone(self),
            session_id.to_string(),
            mode,
            tools,
            buffer,
        ))
    }
}
