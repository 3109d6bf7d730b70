//! LLM integration for assistd.
//!
//! Every agent gets its own provider instance, built by an [`LlmFactory`]
//! from the agent's `llm` block layered over process-wide [`LlmSettings`].
//! The default factory talks to any OpenAI-compatible Chat Completions
//! endpoint.

pub mod chat_completions;
pub mod provider;
pub mod reasoning;

pub use chat_completions::ChatCompletionsProvider;
pub use provider::*;
pub use reasoning::{Reasoning, ReasoningContext, RespondOutput, RespondResult, TokenUsage};

use std::sync::Arc;

use secrecy::SecretString;

use crate::defs::AgentDef;
use crate::error::{ConfigError, LlmError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Process-wide LLM endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: SecretString,
    /// Model used by agents that do not name one.
    pub default_model: String,
}

impl LlmSettings {
    /// Load from `OPENAI_API_KEY`, `ASSISTD_LLM_BASE_URL` and `ASSISTD_LLM_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        Ok(Self {
            base_url: std::env::var("ASSISTD_LLM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: SecretString::from(api_key),
            default_model: std::env::var("ASSISTD_LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Builds the LLM client an agent talks to.
pub trait LlmFactory: Send + Sync {
    fn build(&self, def: &AgentDef) -> Result<Arc<dyn LlmProvider>, LlmError>;
}

/// Factory for [`ChatCompletionsProvider`]s sharing one HTTP client.
pub struct ProviderFactory {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl ProviderFactory {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "chat_completions".to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { settings, client })
    }

    /// Model an agent will use once its overrides are applied.
    pub fn model_for(&self, def: &AgentDef) -> String {
        def.llm
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone())
    }
}

impl LlmFactory for ProviderFactory {
    fn build(&self, def: &AgentDef) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let model = self.model_for(def);
        tracing::info!(agent = %def.id, "Using chat completions (model: {})", model);
        Ok(Arc::new(ChatCompletionsProvider::new(
            self.client.clone(),
            self.settings.base_url.clone(),
            self.settings.api_key.clone(),
            model,
        )))
    }
}
