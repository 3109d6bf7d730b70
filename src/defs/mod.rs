//! Agent, cron, and skill definitions.
//!
//! Definitions are immutable configuration read from a [`DefinitionLoader`].
//! Each kind validates itself; loaders exclude invalid files from discovery
//! instead of failing the whole pass.

pub mod loader;
pub mod schedule;

pub use loader::{
    AgentLoader, CronLoader, DefinitionDir, DefinitionLoader, MemoryDefinitions, SkillLoader,
};
pub use schedule::CronSchedule;

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("hardcoded regex"));

/// Reject ids that could escape the definition directory or break keys.
pub fn validate_id(kind: &str, id: &str) -> Result<(), DefinitionError> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(DefinitionError::invalid(
            kind,
            id,
            "id must start with a letter or digit and contain only letters, digits, '_' or '-'",
        ))
    }
}

/// Common behaviour of every definition kind.
pub trait Definition: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind label used in errors and logs ("agent", "cron", "skill").
    const KIND: &'static str;

    fn id(&self) -> &str;

    /// Check the definition after parsing.
    fn validate(&self) -> Result<(), DefinitionError> {
        validate_id(Self::KIND, self.id())
    }
}

// ── Agents ──────────────────────────────────────────────────────────

/// Per-agent LLM overrides. Unset fields fall back to process defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentLlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// An agent role: prompt, model, and admission-control limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub llm: AgentLlmConfig,
    #[serde(default)]
    pub allow_skills: bool,
    /// Sessions of this agent allowed to run at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    1
}

impl AgentDef {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            system_prompt: system_prompt.into(),
            llm: AgentLlmConfig::default(),
            allow_skills: false,
            max_concurrency: default_max_concurrency(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Effective semaphore size, never below one.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Definition for AgentDef {
    const KIND: &'static str = "agent";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        validate_id(Self::KIND, &self.id)?;
        if self.system_prompt.trim().is_empty() {
            return Err(DefinitionError::invalid(
                Self::KIND,
                &self.id,
                "system_prompt is empty",
            ));
        }
        Ok(())
    }
}

// ── Crons ───────────────────────────────────────────────────────────

/// A scheduled trigger that enqueues a job for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronDef {
    pub id: String,
    pub agent_id: String,
    /// Five-field cron expression: minute hour day-of-month month day-of-week.
    pub schedule: String,
    pub message: String,
    /// Delete the definition once it has been dispatched.
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CronDef {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        schedule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            schedule: schedule.into(),
            message: message.into(),
            one_shot: false,
            enabled: true,
        }
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    /// Parse the schedule, applying the cadence check.
    pub fn parsed_schedule(&self) -> Result<CronSchedule, DefinitionError> {
        CronSchedule::parse(&self.schedule)
            .map_err(|reason| DefinitionError::invalid(Self::KIND, &self.id, reason))
    }
}

impl Definition for CronDef {
    const KIND: &'static str = "cron";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        validate_id(Self::KIND, &self.id)?;
        validate_id("agent", &self.agent_id)
            .map_err(|_| DefinitionError::invalid(Self::KIND, &self.id, "invalid agent_id"))?;
        self.parsed_schedule().map(|_| ())
    }
}

// ── Skills ──────────────────────────────────────────────────────────

/// A block of instructions an agent can pull into its context on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
}

impl SkillDef {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            content: content.into(),
        }
    }
}

impl Definition for SkillDef {
    const KIND: &'static str = "skill";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_traversal() {
        assert!(validate_id("agent", "assistant").is_ok());
        assert!(validate_id("agent", "news-digest_2").is_ok());
        assert!(validate_id("agent", "../etc").is_err());
        assert!(validate_id("agent", "").is_err());
        assert!(validate_id("agent", "-leading").is_err());
        assert!(validate_id("agent", "a/b").is_err());
    }

    #[test]
    fn agent_defaults_from_json() {
        let def: AgentDef =
            serde_json::from_str(r#"{"id":"assistant","system_prompt":"Be helpful."}"#).unwrap();
        assert_eq!(def.max_concurrency, 1);
        assert!(!def.allow_skills);
        assert_eq!(def.llm, AgentLlmConfig::default());
        assert_eq!(def.display_name(), "assistant");
    }

    #[test]
    fn concurrency_limit_is_at_least_one() {
        let def = AgentDef::new("a", "p").with_max_concurrency(0);
        assert_eq!(def.concurrency_limit(), 1);
        let def = AgentDef::new("a", "p").with_max_concurrency(4);
        assert_eq!(def.concurrency_limit(), 4);
    }

    #[test]
    fn empty_prompt_is_invalid() {
        let def = AgentDef::new("a", "  ");
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::Invalid { .. })
        ));
    }

    #[test]
    fn cron_validation_checks_schedule() {
        assert!(CronDef::new("digest", "assistant", "0 8 * * *", "hi").validate().is_ok());
        assert!(CronDef::new("spam", "assistant", "* * * * *", "hi").validate().is_err());
        assert!(CronDef::new("bad", "assistant", "not a cron", "hi").validate().is_err());
        assert!(CronDef::new("x", "../a", "0 8 * * *", "hi").validate().is_err());
    }

    #[test]
    fn cron_enabled_by_default() {
        let def: CronDef = serde_json::from_str(
            r#"{"id":"c","agent_id":"a","schedule":"0 9 * * 1","message":"standup"}"#,
        )
        .unwrap();
        assert!(def.enabled);
        assert!(!def.one_shot);
    }
}
