//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Agent used for chat-platform identities that have not picked one.
pub const DEFAULT_AGENT_ID: &str = "assistant";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root directory for history, definitions, and the session map.
    pub data_dir: PathBuf,
    /// Agent bound to new chat-platform identities.
    pub default_agent: String,
    /// How often the cron worker re-reads schedules.
    pub cron_interval: Duration,
    /// How often the server checks for crashed workers.
    pub supervisor_interval: Duration,
    /// History window sent to the LLM in chat mode.
    pub chat_max_history: usize,
    /// History window sent to the LLM in job mode.
    pub job_max_history: usize,
    /// Upper bound on LLM → tool round trips within one chat turn.
    pub max_tool_iterations: usize,
    /// Requeues allowed for a job that keeps failing transiently.
    pub max_job_retries: u32,
    /// Base delay before a failed job is requeued (scaled by retry count).
    pub retry_backoff: Duration,
    /// Port for the auxiliary HTTP surface (None = disabled).
    pub http_port: Option<u16>,
    /// Whether the stdin/stdout bus is enabled.
    pub cli_enabled: bool,
    /// Directory for daily-rotated log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            default_agent: DEFAULT_AGENT_ID.to_string(),
            cron_interval: Duration::from_secs(60),
            supervisor_interval: Duration::from_secs(5),
            chat_max_history: 40,
            job_max_history: 200,
            max_tool_iterations: 25,
            max_job_retries: 3,
            retry_backoff: Duration::from_millis(2000),
            http_port: None,
            cli_enabled: true,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `ASSISTD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = std::env::var("ASSISTD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".assistd")
            });

        let http_port = match std::env::var("ASSISTD_HTTP_PORT") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_value("ASSISTD_HTTP_PORT", &raw)?),
            _ => None,
        };

        Ok(Self {
            data_dir,
            default_agent: std::env::var("ASSISTD_DEFAULT_AGENT")
                .unwrap_or(defaults.default_agent),
            cron_interval: Duration::from_secs(env_or(
                "ASSISTD_CRON_INTERVAL_SECS",
                defaults.cron_interval.as_secs(),
            )?),
            supervisor_interval: Duration::from_secs(env_or(
                "ASSISTD_SUPERVISOR_INTERVAL_SECS",
                defaults.supervisor_interval.as_secs(),
            )?),
            chat_max_history: env_or("ASSISTD_CHAT_HISTORY", defaults.chat_max_history)?,
            job_max_history: env_or("ASSISTD_JOB_HISTORY", defaults.job_max_history)?,
            max_tool_iterations: env_or(
                "ASSISTD_MAX_TOOL_ITERATIONS",
                defaults.max_tool_iterations,
            )?,
            max_job_retries: env_or("ASSISTD_MAX_JOB_RETRIES", defaults.max_job_retries)?,
            retry_backoff: Duration::from_millis(env_or(
                "ASSISTD_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            http_port,
            cli_enabled: env_or("ASSISTD_CLI", defaults.cli_enabled)?,
            log_dir: std::env::var("ASSISTD_LOG_DIR").ok().map(PathBuf::from),
        })
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    pub fn crons_dir(&self) -> PathBuf {
        self.data_dir.join("crons")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.data_dir.join("skills")
    }

    pub fn session_map_path(&self) -> PathBuf {
        self.data_dir.join("session_map.json")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        })
}
