//! Output sinks for agent sessions.
//!
//! Every frontend method is infallible: a frontend that cannot deliver logs
//! the failure and returns, so display problems never change the course of a
//! conversation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channels::bus::{BusContext, MessageBus};

/// Where a session's output goes.
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Final assistant text.
    async fn show_message(&self, content: &str);

    /// Out-of-band notices (errors, limits reached).
    async fn show_system_message(&self, content: &str);

    /// A transient status began ("Thinking...", "Calling tool X").
    async fn status_start(&self, label: &str);

    /// The current transient status ended.
    async fn status_end(&self);

    /// A task was handed to another agent.
    async fn on_dispatch(&self, _agent_id: &str, _task: &str) {}

    /// A dispatched agent finished.
    async fn on_dispatch_complete(&self, _agent_id: &str) {}
}

/// Scoped transient status. `status_end` is issued on every exit path.
pub struct TransientStatus {
    frontend: Arc<dyn Frontend>,
    finished: bool,
}

impl TransientStatus {
    pub async fn begin(frontend: Arc<dyn Frontend>, label: &str) -> Self {
        frontend.status_start(label).await;
        Self {
            frontend,
            finished: false,
        }
    }

    pub async fn finish(mut self) {
        self.finished = true;
        self.frontend.status_end().await;
    }
}

impl Drop for TransientStatus {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Dropped by an error or cancellation: end the status in the background.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let frontend = Arc::clone(&self.frontend);
            handle.spawn(async move {
                frontend.status_end().await;
            });
        }
    }
}

// ── Log ─────────────────────────────────────────────────────────────

/// Frontend that writes everything to the log. Used for cron jobs and
/// sub-agent runs, which have no one watching.
pub struct LogFrontend {
    label: String,
}

impl LogFrontend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl Frontend for LogFrontend {
    async fn show_message(&self, content: &str) {
        tracing::info!(source = %self.label, "{}", content);
    }

    async fn show_system_message(&self, content: &str) {
        tracing::warn!(source = %self.label, "{}", content);
    }

    async fn status_start(&self, label: &str) {
        tracing::debug!(source = %self.label, "{}", label);
    }

    async fn status_end(&self) {}

    async fn on_dispatch(&self, agent_id: &str, task: &str) {
        tracing::info!(source = %self.label, target_agent = %agent_id, "Dispatching: {}", task);
    }

    async fn on_dispatch_complete(&self, agent_id: &str) {
        tracing::info!(source = %self.label, target_agent = %agent_id, "Dispatch complete");
    }
}

// ── Bus ─────────────────────────────────────────────────────────────

/// Frontend that answers through the bus a message arrived on.
pub struct BusFrontend {
    bus: Arc<dyn MessageBus>,
    context: BusContext,
}

impl BusFrontend {
    pub fn new(bus: Arc<dyn MessageBus>, context: BusContext) -> Self {
        Self { bus, context }
    }
}

#[async_trait]
impl Frontend for BusFrontend {
    async fn show_message(&self, content: &str) {
        if let Err(e) = self.bus.reply(content, &self.context).await {
            tracing::error!(
                bus = %self.bus.name(),
                user = %self.context.user_id,
                "Failed to deliver reply: {}",
                e
            );
        }
    }

    async fn show_system_message(&self, content: &str) {
        if let Err(e) = self.bus.reply(content, &self.context).await {
            tracing::error!(
                bus = %self.bus.name(),
                user = %self.context.user_id,
                "Failed to deliver notice: {}",
                e
            );
        }
    }

    async fn status_start(&self, label: &str) {
        if let Err(e) = self.bus.send_status(label, &self.context).await {
            tracing::debug!(bus = %self.bus.name(), "Failed to send status: {}", e);
        }
    }

    async fn status_end(&self) {
        if let Err(e) = self.bus.clear_status(&self.context).await {
            tracing::debug!(bus = %self.bus.name(), "Failed to clear status: {}", e);
        }
    }

    async fn on_dispatch(&self, agent_id: &str, _task: &str) {
        self.status_start(&format!("Asking {agent_id}...")).await;
    }

    async fn on_dispatch_complete(&self, _agent_id: &str) {
        self.status_end().await;
    }
}
