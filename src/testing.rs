//! Scripted stand-ins for the LLM, frontends, and buses.
//!
//! Used by the unit and integration tests, and handy when embedding the
//! runtime somewhere without network access.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{BusContext, Frontend, InboundMessage, MessageBus, MessageStream};
use crate::defs::AgentDef;
use crate::error::{BusError, LlmError};
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmFactory, LlmProvider,
    Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// One scripted LLM reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    Tools(Vec<ToolCall>),
    Fail(String),
}

impl ScriptStep {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptStep::Text(content.into())
    }

    /// Tool calls with empty arguments, given as `(call_id, tool_name)`.
    pub fn tools(calls: Vec<(&str, &str)>) -> Self {
        ScriptStep::Tools(
            calls
                .into_iter()
                .map(|(id, name)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                })
                .collect(),
        )
    }

    /// A single tool call with arguments.
    pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        ScriptStep::Tools(vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }])
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        ScriptStep::Fail(reason.into())
    }
}

#[derive(Default)]
struct ScriptState {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
    prompts: Mutex<HashMap<String, Vec<String>>>,
    delay: Mutex<Duration>,
}

/// LLM factory whose providers replay per-agent scripts.
///
/// An agent with no script left answers `"ok"`.
#[derive(Default, Clone)]
pub struct ScriptedLlmFactory {
    state: Arc<ScriptState>,
}

impl ScriptedLlmFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for an agent.
    pub fn script(&self, agent_id: &str, steps: Vec<ScriptStep>) {
        lock(&self.state.scripts)
            .entry(agent_id.to_string())
            .or_default()
            .extend(steps);
    }

    /// Make every call take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.state.delay) = delay;
    }

    /// Most calls observed in flight at once for an agent.
    pub fn peak_concurrency(&self, agent_id: &str) -> usize {
        lock(&self.state.peak).get(agent_id).copied().unwrap_or(0)
    }

    /// Last user message of every call made for an agent.
    pub fn prompts(&self, agent_id: &str) -> Vec<String> {
        lock(&self.state.prompts)
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self, agent_id: &str) -> usize {
        self.prompts(agent_id).len()
    }
}

impl LlmFactory for ScriptedLlmFactory {
    fn build(&self, def: &AgentDef) -> Result<Arc<dyn LlmProvider>, LlmError> {
        Ok(Arc::new(ScriptedLlm {
            agent_id: def.id.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedLlm {
    agent_id: String,
    state: Arc<ScriptState>,
}

struct InFlight<'a> {
    llm: &'a ScriptedLlm,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = lock(&self.llm.state.in_flight).get_mut(&self.llm.agent_id) {
            *n = n.saturating_sub(1);
        }
    }
}

impl ScriptedLlm {
    async fn next_step(&self, messages: &[ChatMessage]) -> ScriptStep {
        let _in_flight = {
            let mut in_flight = lock(&self.state.in_flight);
            let n = in_flight.entry(self.agent_id.clone()).or_default();
            *n += 1;
            let now = *n;
            let mut peak = lock(&self.state.peak);
            let p = peak.entry(self.agent_id.clone()).or_default();
            *p = (*p).max(now);
            InFlight { llm: self }
        };

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        lock(&self.state.prompts)
            .entry(self.agent_id.clone())
            .or_default()
            .push(last_user);

        let delay = *lock(&self.state.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        lock(&self.state.scripts)
            .get_mut(&self.agent_id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| ScriptStep::text("ok"))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.next_step(&request.messages).await {
            ScriptStep::Fail(reason) => Err(LlmError::RequestFailed {
                provider: "scripted".to_string(),
                reason,
            }),
            ScriptStep::Text(content) => Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
            }),
            ScriptStep::Tools(_) => Err(LlmError::InvalidResponse {
                provider: "scripted".to_string(),
                reason: "tool calls scripted for a request without tools".to_string(),
            }),
        }
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        match self.next_step(&request.messages).await {
            ScriptStep::Fail(reason) => Err(LlmError::RequestFailed {
                provider: "scripted".to_string(),
                reason,
            }),
            ScriptStep::Text(content) => Ok(ToolCompletionResponse {
                content: Some(content),
                tool_calls: Vec::new(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
            }),
            ScriptStep::Tools(tool_calls) => Ok(ToolCompletionResponse {
                content: None,
                tool_calls,
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::ToolUse,
            }),
        }
    }
}

// ── Frontend ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum FrontendEvent {
    Message(String),
    System(String),
    StatusStart(String),
    StatusEnd,
    Dispatch(String),
    DispatchComplete(String),
}

/// Frontend that records everything it is shown.
#[derive(Default)]
pub struct RecordingFrontend {
    events: Mutex<Vec<FrontendEvent>>,
}

impl RecordingFrontend {
    pub fn messages(&self) -> Vec<String> {
        self.collect(|e| match e {
            FrontendEvent::Message(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn system_messages(&self) -> Vec<String> {
        self.collect(|e| match e {
            FrontendEvent::System(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn status_starts(&self) -> usize {
        self.collect(|e| match e {
            FrontendEvent::StatusStart(s) => Some(s.clone()),
            _ => None,
        })
        .len()
    }

    pub fn status_ends(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| **e == FrontendEvent::StatusEnd)
            .count()
    }

    /// Agents dispatched to, paired with whether each dispatch completed.
    pub fn dispatches(&self) -> Vec<(String, bool)> {
        let events = lock(&self.events);
        let started: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                FrontendEvent::Dispatch(a) => Some(a.clone()),
                _ => None,
            })
            .collect();
        started
            .into_iter()
            .map(|agent| {
                let done = events
                    .iter()
                    .any(|e| *e == FrontendEvent::DispatchComplete(agent.clone()));
                (agent, done)
            })
            .collect()
    }

    fn collect(&self, f: impl Fn(&FrontendEvent) -> Option<String>) -> Vec<String> {
        lock(&self.events).iter().filter_map(f).collect()
    }

    fn push(&self, event: FrontendEvent) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl Frontend for RecordingFrontend {
    async fn show_message(&self, content: &str) {
        self.push(FrontendEvent::Message(content.to_string()));
    }

    async fn show_system_message(&self, content: &str) {
        self.push(FrontendEvent::System(content.to_string()));
    }

    async fn status_start(&self, label: &str) {
        self.push(FrontendEvent::StatusStart(label.to_string()));
    }

    async fn status_end(&self) {
        self.push(FrontendEvent::StatusEnd);
    }

    async fn on_dispatch(&self, agent_id: &str, _task: &str) {
        self.push(FrontendEvent::Dispatch(agent_id.to_string()));
    }

    async fn on_dispatch_complete(&self, agent_id: &str) {
        self.push(FrontendEvent::DispatchComplete(agent_id.to_string()));
    }
}

// ── Bus ─────────────────────────────────────────────────────────────

/// In-process bus: tests inject inbound messages and read back what was sent.
pub struct RecordingBus {
    name: String,
    allowed: Option<HashSet<String>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    replies: Mutex<Vec<(String, String)>>,
    posts: Mutex<Vec<(Option<String>, String)>>,
}

impl RecordingBus {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            allowed: None,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            replies: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
        }
    }

    /// Only accept these user ids.
    pub fn allow_only(mut self, users: &[&str]) -> Self {
        self.allowed = Some(users.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Deliver an inbound message from `user_id`.
    pub fn inject(&self, user_id: &str, content: &str) {
        let msg = InboundMessage::new(BusContext::new(self.name.clone(), user_id), content);
        if let Some(tx) = lock(&self.inbound_tx).as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// End the inbound stream.
    pub fn close(&self) {
        lock(&self.inbound_tx).take();
    }

    /// `(user_id, content)` of every reply.
    pub fn replies(&self) -> Vec<(String, String)> {
        lock(&self.replies).clone()
    }

    /// `(target, content)` of every proactive post.
    pub fn posts(&self) -> Vec<(Option<String>, String)> {
        lock(&self.posts).clone()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<MessageStream, BusError> {
        let rx = lock(&self.inbound_rx)
            .take()
            .ok_or_else(|| BusError::StartupFailed {
                name: self.name.clone(),
                reason: "already started".to_string(),
            })?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn is_allowed(&self, context: &BusContext) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|users| users.contains(&context.user_id))
    }

    async fn reply(&self, content: &str, context: &BusContext) -> Result<(), BusError> {
        lock(&self.replies).push((context.user_id.clone(), content.to_string()));
        Ok(())
    }

    async fn post(&self, content: &str, target: Option<&str>) -> Result<(), BusError> {
        lock(&self.posts).push((target.map(str::to_string), content.to_string()));
        Ok(())
    }
}
