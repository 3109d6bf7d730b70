//! Inbound chat-platform messages → command replies or CHAT jobs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::select_all;

use crate::agent::{Command, CommandRegistry};
use crate::channels::{BusFrontend, InboundMessage, MessageBus};
use crate::context::RuntimeContext;
use crate::error::{BusError, Error};
use crate::worker::{Job, JobMode, Worker};

const APOLOGY: &str = "Sorry, I couldn't process that message. Please try again in a moment.";

/// Listens on every configured bus at once.
///
/// Disallowed senders are dropped silently. Slash commands are answered
/// straight through the bus. Everything else becomes a CHAT job on the
/// sender's durable session.
pub struct MessageBusWorker {
    ctx: Arc<RuntimeContext>,
}

impl MessageBusWorker {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    /// Handle one inbound message.
    pub async fn handle(&self, bus: &Arc<dyn MessageBus>, msg: InboundMessage) {
        let context = &msg.context;
        if !bus.is_allowed(context) {
            tracing::debug!(
                bus = %bus.name(),
                user = %context.user_id,
                "Ignoring message from sender not on the allow list"
            );
            return;
        }

        if let Some(command) = Command::parse(&msg.content) {
            let reply = CommandRegistry::reply_for(&command, context, &self.ctx).await;
            if let Err(e) = bus.reply(&reply, context).await {
                tracing::error!(
                    bus = %bus.name(),
                    user = %context.user_id,
                    "Failed to reply to command: {}",
                    e
                );
            }
            return;
        }

        let key = context.identity_key();
        let binding = match self.ctx.session_map.resolve(&key).await {
            Ok(binding) => binding,
            Err(e) => {
                tracing::error!(identity = %key, "Failed to resolve session: {}", e);
                if let Err(e) = bus.reply(APOLOGY, context).await {
                    tracing::error!(
                        bus = %bus.name(),
                        user = %context.user_id,
                        "Failed to send apology: {}",
                        e
                    );
                }
                return;
            }
        };

        tracing::debug!(
            bus = %bus.name(),
            identity = %key,
            agent = %binding.agent_id,
            session = %binding.session_id,
            "Inbound message"
        );
        let frontend = Arc::new(BusFrontend::new(Arc::clone(bus), msg.context.clone()));
        self.ctx.queue.push(
            Job::new(binding.agent_id, msg.content, frontend, JobMode::Chat)
                .with_session(binding.session_id),
        );
    }
}

#[async_trait]
impl Worker for MessageBusWorker {
    fn name(&self) -> &str {
        "message-bus"
    }

    async fn run(&self) -> Result<(), Error> {
        let mut streams = Vec::with_capacity(self.ctx.buses.len());
        for bus in &self.ctx.buses {
            match bus.start().await {
                Ok(stream) => {
                    tracing::info!(bus = %bus.name(), "Bus listening");
                    let bus = Arc::clone(bus);
                    streams.push(stream.map(move |msg| (Arc::clone(&bus), msg)).boxed());
                }
                Err(e) => tracing::error!(bus = %bus.name(), "Bus failed to start: {}", e),
            }
        }

        if streams.is_empty() {
            return Err(BusError::StartupFailed {
                name: "all".to_string(),
                reason: "no bus could be started".to_string(),
            }
            .into());
        }

        let mut inbound = select_all(streams);
        while let Some((bus, msg)) = inbound.next().await {
            self.handle(&bus, msg).await;
        }
        Err(BusError::StreamsEnded.into())
    }
}
