//! Agent session — the tool-calling conversation loop.
//!
//! One call to [`AgentSession::chat`] handles one inbound message:
//!
//! 1. Record the user message (memory + history store).
//! 2. Ask the LLM with the system prompt, the trimmed window and the tool
//!    schemas, then record the assistant turn.
//! 3. No tool calls: show and return the text.
//! 4. Tool calls: run them all concurrently, record each result as its own
//!    tool message in the order the model issued the calls, and go to 2.
//!
//! Tool failures become `Error: ...` results the model can react to. LLM and
//! history failures propagate to the caller.

use std::sync::Arc;

use futures::future::join_all;

use crate::agent::{Agent, MessageBuffer};
use crate::channels::{Frontend, TransientStatus};
use crate::context::ToolContext;
use crate::error::Error;
use crate::history::HistoryMessage;
use crate::llm::{ChatMessage, Reasoning, ReasoningContext, RespondResult, TokenUsage, ToolCall};
use crate::tools::ToolRegistry;
use crate::worker::JobMode;

/// A live conversation between one agent and one session id.
pub struct AgentSession {
    agent: Arc<Agent>,
    session_id: String,
    mode: JobMode,
    tools: ToolRegistry,
    buffer: MessageBuffer,
    usage: TokenUsage,
}

impl AgentSession {
    pub(crate) fn new(
        agent: Arc<Agent>,
        session_id: String,
        mode: JobMode,
        tools: ToolRegistry,
        buffer: MessageBuffer,
    ) -> Self {
        Self {
            agent,
            session_id,
            mode,
            tools,
            buffer,
            usage: TokenUsage::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> &str {
        self.agent.id()
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Run one user turn to completion and return the final assistant text.
    pub async fn chat(
        &mut self,
        message: &str,
        frontend: Arc<dyn Frontend>,
    ) -> Result<String, Error> {
        self.record(ChatMessage::user(message)).await?;

        let def = self.agent.def();
        let reasoning = Reasoning::new(Arc::clone(self.agent.llm()))
            .with_system_prompt(def.system_prompt.clone())
            .with_temperature(def.llm.temperature)
            .with_max_tokens(def.llm.max_tokens);
        let tool_defs = self.tools.tool_definitions();
        let max_iterations = self.agent.context().config.max_tool_iterations.max(1);

        for iteration in 1..=max_iterations {
            let context = ReasoningContext::new()
                .with_messages(self.buffer.messages().to_vec())
                .with_tools(tool_defs.clone());

            let status = TransientStatus::begin(Arc::clone(&frontend), "Thinking...").await;
            let output = reasoning.respond_with_tools(&context).await;
            status.finish().await;
            let output = output?;
            self.usage.add(output.usage);

            match output.result {
                RespondResult::Text(text) => {
                    self.record(ChatMessage::assistant(text.clone())).await?;
                    frontend.show_message(&text).await;
                    self.log_usage(iteration);
                    return Ok(text);
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => {
                    self.record(ChatMessage::assistant_with_tool_calls(
                        content,
                        tool_calls.clone(),
                    ))
                    .await?;

                    let results = self.run_tools(&tool_calls, &frontend).await;
                    for (call, result) in tool_calls.iter().zip(results) {
                        self.record(ChatMessage::tool_result(&call.id, &call.name, result))
                            .await?;
                    }
                }
            }
        }

        tracing::warn!(
            agent = %self.agent.id(),
            session = %self.session_id,
            "Tool iteration limit ({}) reached",
            max_iterations
        );
        frontend
            .show_system_message(&format!(
                "Stopped after {} rounds of tool calls without a final answer.",
                max_iterations
            ))
            .await;

        let last = self
            .buffer
            .last_assistant_text()
            .unwrap_or_default()
            .to_string();
        if !last.is_empty() {
            frontend.show_message(&last).await;
        }
        self.log_usage(max_iterations);
        Ok(last)
    }

    /// Execute every call concurrently. Results come back in call order.
    async fn run_tools(&self, calls: &[ToolCall], frontend: &Arc<dyn Frontend>) -> Vec<String> {
        let ctx = ToolContext::new(
            self.agent.id(),
            self.session_id.clone(),
            self.mode,
            Arc::clone(frontend),
        );

        let runs = calls.iter().map(|call| {
            let ctx = &ctx;
            async move {
                let label = format!("Calling tool {}", call.name);
                let status = TransientStatus::begin(Arc::clone(&ctx.frontend), &label).await;
                let result = self
                    .tools
                    .execute(&call.name, call.arguments.clone(), ctx)
                    .await;
                status.finish().await;

                match result {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(
                            agent = %ctx.agent_id,
                            session = %ctx.session_id,
                            tool = %call.name,
                            "Tool failed: {}",
                            e
                        );
                        format!("Error: {}", e)
                    }
                }
            }
        });

        join_all(runs).await
    }

    /// Append to the window and persist.
    async fn record(&mut self, message: ChatMessage) -> Result<(), Error> {
        self.agent
            .context()
            .history
            .save_message(&self.session_id, &HistoryMessage::from(&message))
            .await?;
        self.buffer.push(message);
        Ok(())
    }

    fn log_usage(&self, iterations: usize) {
        let cost = self.usage.cost(self.agent.llm().cost_per_token());
        tracing::debug!(
            agent = %self.agent.id(),
            session = %self.session_id,
            iterations,
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            cost = %cost,
            "Chat turn complete"
        );
    }
}
