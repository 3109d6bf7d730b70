use std::sync::Arc;

use anyhow::Context as _;

use assistd::agent::{Agent, SessionMap};
use assistd::channels::{CliBus, MessageBus, TelegramBus, TelegramConfig};
use assistd::config::RuntimeConfig;
use assistd::context::RuntimeContext;
use assistd::defs::{AgentDef, CronDef, DefinitionDir, DefinitionLoader, SkillDef};
use assistd::error::DefinitionError;
use assistd::history::HistoryStore;
use assistd::llm::{LlmSettings, ProviderFactory};
use assistd::server::Server;
use assistd::worker::JobQueue;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. \
Answer concisely. Use your tools when they help, and say so when you cannot do something.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env().context("invalid configuration")?;

    // Held for the process lifetime so buffered file logs are flushed on exit.
    let _log_guard = init_logging(&config);

    eprintln!("🤖 assistd v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data: {}", config.data_dir.display());

    // ── Stores ──────────────────────────────────────────────────────────
    let history = Arc::new(
        HistoryStore::open(config.history_dir())
            .await
            .context("failed to open history store")?,
    );
    let agents = Arc::new(DefinitionDir::<AgentDef>::open(config.agents_dir())?);
    let crons = Arc::new(DefinitionDir::<CronDef>::open(config.crons_dir())?);
    let skills = Arc::new(DefinitionDir::<SkillDef>::open(config.skills_dir())?);

    match agents.load(&config.default_agent).await {
        Ok(_) => {}
        Err(DefinitionError::NotFound { .. }) => {
            let def = AgentDef::new(config.default_agent.clone(), DEFAULT_SYSTEM_PROMPT);
            agents.save(&def).await?;
            tracing::info!(agent = %def.id, "Created default agent definition");
        }
        Err(e) => return Err(e).context("failed to read default agent"),
    }

    let session_map = Arc::new(
        SessionMap::open(
            config.session_map_path(),
            Arc::clone(&history),
            config.default_agent.clone(),
        )
        .await?,
    );

    // ── LLM ─────────────────────────────────────────────────────────────
    let settings = LlmSettings::from_env()?;
    eprintln!("   Model: {} @ {}", settings.default_model, settings.base_url);
    let llm = Arc::new(ProviderFactory::new(settings)?);

    // ── Buses ───────────────────────────────────────────────────────────
    let mut buses: Vec<Arc<dyn MessageBus>> = Vec::new();
    if config.cli_enabled {
        buses.push(Arc::new(CliBus::new()));
    }
    if let Some(telegram) = TelegramConfig::from_env() {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if telegram.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else if telegram.allowed_users.is_empty() {
                "none (deny all)".to_string()
            } else {
                telegram.allowed_users.join(", ")
            }
        );
        buses.push(Arc::new(TelegramBus::new(telegram)));
    }
    let bus_names: Vec<&str> = buses.iter().map(|b| b.name()).collect();
    eprintln!(
        "   Buses: {}",
        if bus_names.is_empty() {
            "none".to_string()
        } else {
            bus_names.join(", ")
        }
    );
    if let Some(port) = config.http_port {
        eprintln!("   HTTP: http://0.0.0.0:{}", port);
    }

    let ctx = Arc::new(RuntimeContext {
        config,
        history,
        agents,
        crons,
        skills,
        llm,
        queue: Arc::new(JobQueue::new()),
        session_map,
        buses,
    });

    // Every agent must be constructible before anything runs.
    let defs = ctx.agents.discover().await?;
    let agent_count = defs.len();
    for def in defs {
        let id = def.id.clone();
        Agent::new(def, Arc::clone(&ctx))
            .with_context(|| format!("failed to build agent '{id}'"))?;
    }
    eprintln!("   Agents: {}\n", agent_count);

    Server::new(ctx)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}

fn init_logging(config: &RuntimeConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "assistd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
