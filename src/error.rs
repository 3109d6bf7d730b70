//! Error types for assistd.

use std::time::Duration;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}

/// How the runtime reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A referenced agent/cron/skill/session is absent. The current job is dropped.
    NotFound,
    /// Anything that may succeed on another attempt. The job is requeued.
    Transient,
    /// A malformed definition. Excluded from the discovery pass that found it.
    Validation,
    /// Cannot continue at all. Propagated to the process.
    Fatal,
}

impl Error {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) => ErrorClass::Fatal,
            Error::Definition(DefinitionError::NotFound { .. }) => ErrorClass::NotFound,
            Error::Definition(DefinitionError::Invalid { .. })
            | Error::Definition(DefinitionError::Parse { .. }) => ErrorClass::Validation,
            Error::History(HistoryError::SessionNotFound { .. }) => ErrorClass::NotFound,
            Error::History(HistoryError::InvalidSessionId { .. }) => ErrorClass::Validation,
            _ => ErrorClass::Transient,
        }
    }

    /// True when a session id is unknown to the history store.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Error::History(HistoryError::SessionNotFound { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversation history store errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Invalid session id '{id}'")]
    InvalidSessionId { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Agent, cron, and skill definition errors.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{kind} definition '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("Invalid {kind} definition '{id}': {reason}")]
    Invalid {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DefinitionError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        DefinitionError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid(kind: &str, id: &str, reason: impl Into<String>) -> Self {
        DefinitionError::Invalid {
            kind: kind.to_string(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on bus {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("All bus streams ended")]
    StreamsEnded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job for agent {agent_id} dropped: {reason}")]
    Dropped { agent_id: String, reason: String },

    #[error("Job for agent {agent_id} gave up after {retries} retries: {reason}")]
    RetriesExhausted {
        agent_id: String,
        retries: u32,
        reason: String,
    },
}

/// Slash-command errors. Always rendered into the reply text.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: /{0}. Type /help for the list of commands.")]
    Unknown(String),

    #[error("Usage: {usage}")]
    Usage { usage: String },

    #[error("{0}")]
    Failed(String),
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_agent_is_not_found() {
        let err = Error::from(DefinitionError::not_found("agent", "ghost"));
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert!(matches!(err, Error::Definition(DefinitionError::NotFound { .. })));
        assert!(!err.is_session_not_found());
    }

    #[test]
    fn missing_session_is_recoverable_not_found() {
        let err = Error::from(HistoryError::SessionNotFound { id: "s1".into() });
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert!(err.is_session_not_found());
    }

    #[test]
    fn llm_failure_is_transient() {
        let err = Error::from(LlmError::RequestFailed {
            provider: "stub".into(),
            reason: "boom".into(),
        });
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn bad_definition_is_validation() {
        let err = Error::from(DefinitionError::invalid("cron", "c1", "too frequent"));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn config_is_fatal() {
        let err = Error::from(ConfigError::MissingEnvVar("OPENAI_API_KEY".into()));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
