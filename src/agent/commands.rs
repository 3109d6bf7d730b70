//! Slash commands.
//!
//! Commands are answered locally and immediately. They never reach the job
//! queue or the LLM, so they stay responsive while agents are busy.

use crate::channels::BusContext;
use crate::context::RuntimeContext;
use crate::error::{CommandError, DefinitionError};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Start a fresh session with the current agent.
    New,
    /// Show the current session and agent.
    Session,
    /// List agent definitions.
    Agents,
    /// Switch to another agent. `None` when the id was omitted.
    Agent(Option<String>),
    Ping,
    Unknown(String),
}

impl Command {
    /// Parse message content. `None` when it is not a command.
    pub fn parse(content: &str) -> Option<Command> {
        let trimmed = content.trim();
        let body = trimmed.strip_prefix('/')?;
        let mut parts = body.split_whitespace();
        let name = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::to_string);

        Some(match name.as_str() {
            "help" | "?" => Command::Help,
            "new" | "reset" => Command::New,
            "session" => Command::Session,
            "agents" => Command::Agents,
            "agent" => Command::Agent(arg),
            "ping" => Command::Ping,
            _ => Command::Unknown(name),
        })
    }
}

const HELP_TEXT: &str = "\
Commands:
  /help          show this message
  /new           start a fresh conversation
  /session       show the current session
  /agents        list available agents
  /agent <id>    talk to another agent
  /ping          check that the assistant is alive";

/// Executes commands against the shared runtime.
pub struct CommandRegistry;

impl CommandRegistry {
    /// Run `command` for the sender in `bus_ctx` and produce the reply text.
    pub async fn execute(
        command: &Command,
        bus_ctx: &BusContext,
        ctx: &RuntimeContext,
    ) -> Result<String, CommandError> {
        let key = bus_ctx.identity_key();
        match command {
            Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Ping => Ok("pong".to_string()),
            Command::New => {
                let binding = ctx.session_map.reset(&key).await.map_err(failed)?;
                Ok(format!(
                    "Started a new conversation with {} (session {}).",
                    binding.agent_id, binding.session_id
                ))
            }
            Command::Session => {
                let binding = ctx.session_map.resolve(&key).await.map_err(failed)?;
                let messages = ctx
                    .history
                    .get_session(&binding.session_id)
                    .await
                    .map(|s| s.message_count)
                    .unwrap_or(0);
                Ok(format!(
                    "Session {}\nAgent: {}\nMessages: {}",
                    binding.session_id, binding.agent_id, messages
                ))
            }
            Command::Agents => {
                let mut agents = ctx.agents.discover().await.map_err(failed)?;
                if agents.is_empty() {
                    return Ok("No agents are defined.".to_string());
                }
                agents.sort_by(|a, b| a.id.cmp(&b.id));
                let current = ctx.session_map.get(&key).await.map(|b| b.agent_id);
                let lines: Vec<String> = agents
                    .iter()
                    .map(|a| {
                        let marker = if current.as_deref() == Some(a.id.as_str()) {
                            "*"
                        } else {
                            "-"
                        };
                        if a.description.is_empty() {
                            format!("{} {}", marker, a.id)
                        } else {
                            format!("{} {}: {}", marker, a.id, a.description)
                        }
                    })
                    .collect();
                Ok(format!("Agents:\n{}", lines.join("\n")))
            }
            Command::Agent(None) => Err(CommandError::Usage {
                usage: "/agent <id>".to_string(),
            }),
            Command::Agent(Some(agent_id)) => {
                let def = ctx.agents.load(agent_id).await.map_err(|e| match e {
                    DefinitionError::NotFound { .. } => CommandError::Failed(
                        format!("No agent named '{agent_id}'. Type /agents to see the list."),
                    ),
                    other => failed(other),
                })?;
                let binding = ctx
                    .session_map
                    .bind_agent(&key, &def.id)
                    .await
                    .map_err(failed)?;
                tracing::info!(
                    identity = %key,
                    agent = %def.id,
                    session = %binding.session_id,
                    "Switched agent"
                );
                Ok(format!(
                    "Now talking to {} (session {}).",
                    def.display_name(),
                    binding.session_id
                ))
            }
            Command::Unknown(name) => Err(CommandError::Unknown(name.clone())),
        }
    }

    /// Like [`execute`](Self::execute), with errors rendered as reply text.
    pub async fn reply_for(
        command: &Command,
        bus_ctx: &BusContext,
        ctx: &RuntimeContext,
    ) -> String {
        match Self::execute(command, bus_ctx, ctx).await {
            Ok(reply) => reply,
            Err(e) => e.to_string(),
        }
    }
}

fn failed(e: impl std::fmt::Display) -> CommandError {
    CommandError::Failed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::AgentDef;
    use crate::test_support::TestRuntime;

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("  /PING "), Some(Command::Ping));
        assert_eq!(
            Command::parse("/agent researcher"),
            Some(Command::Agent(Some("researcher".to_string())))
        );
        assert_eq!(Command::parse("/agent"), Some(Command::Agent(None)));
        assert_eq!(
            Command::parse("/frobnicate now"),
            Some(Command::Unknown("frobnicate".to_string()))
        );
        assert_eq!(Command::parse("hello /help"), None);
        assert_eq!(Command::parse("/"), None);
    }

    fn runtime_defs() -> Vec<AgentDef> {
        vec![
            AgentDef::new("assistant", "p"),
            AgentDef::new("researcher", "p").with_description("digs"),
        ]
    }

    #[tokio::test]
    async fn agent_switch_and_session() {
        let rt = TestRuntime::new(runtime_defs()).await;
        let who = BusContext::new("cli", "u1");

        let switch = Command::Agent(Some("researcher".into()));
        let reply = CommandRegistry::reply_for(&switch, &who, &rt.ctx).await;
        assert!(reply.starts_with("Now talking to researcher"));

        let binding = rt.ctx.session_map.get("cli:u1").await.unwrap();
        assert_eq!(binding.agent_id, "researcher");

        let reply = CommandRegistry::reply_for(&Command::Session, &who, &rt.ctx).await;
        assert!(reply.contains(&binding.session_id));
        assert!(reply.contains("Agent: researcher"));
    }

    #[tokio::test]
    async fn unknown_agent_is_a_readable_error() {
        let rt = TestRuntime::new(runtime_defs()).await;
        let who = BusContext::new("cli", "u1");
        let err = CommandRegistry::execute(&Command::Agent(Some("ghost".into())), &who, &rt.ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No agent named 'ghost'"));
        assert!(rt.ctx.session_map.get("cli:u1").await.is_none());
    }

    #[tokio::test]
    async fn new_keeps_agent_and_changes_session() {
        let rt = TestRuntime::new(runtime_defs()).await;
        let who = BusContext::new("cli", "u1");
        let first = rt.ctx.session_map.resolve("cli:u1").await.unwrap();

        CommandRegistry::execute(&Command::New, &who, &rt.ctx).await.unwrap();
        let second = rt.ctx.session_map.get("cli:u1").await.unwrap();
        assert_eq!(second.agent_id, first.agent_id);
        assert_ne!(second.session_id, first.session_id);
    }

    #[tokio::test]
    async fn agents_lists_and_marks_current() {
        let rt = TestRuntime::new(runtime_defs()).await;
        let who = BusContext::new("cli", "u1");
        rt.ctx.session_map.resolve("cli:u1").await.unwrap();

        let reply = CommandRegistry::reply_for(&Command::Agents, &who, &rt.ctx).await;
        assert!(reply.contains("* assistant"));
        assert!(reply.contains("- researcher: digs"));
    }

    #[tokio::test]
    async fn unknown_command_and_usage_render_as_text() {
        let rt = TestRuntime::new(runtime_defs()).await;
        let who = BusContext::new("cli", "u1");
        let reply = CommandRegistry::reply_for(&Command::Unknown("x".into()), &who, &rt.ctx).await;
        assert!(reply.starts_with("Unknown command: /x"));
        let reply = CommandRegistry::reply_for(&Command::Agent(None), &who, &rt.ctx).await;
        assert_eq!(reply, "Usage: /agent <id>");
    }
}
