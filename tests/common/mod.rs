//! Shared fixture for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use assistd::agent::SessionMap;
use assistd::channels::MessageBus;
use assistd::config::RuntimeConfig;
use assistd::context::RuntimeContext;
use assistd::defs::{AgentDef, CronDef, MemoryDefinitions, SkillDef};
use assistd::history::HistoryStore;
use assistd::testing::ScriptedLlmFactory;
use assistd::worker::JobQueue;

/// Maximum time any wait in a test is allowed to take.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Runtime {
    _tmp: TempDir,
    pub ctx: Arc<RuntimeContext>,
    pub llm: Arc<ScriptedLlmFactory>,
    pub crons: Arc<MemoryDefinitions<CronDef>>,
}

/// Build a runtime over in-memory definitions, a scripted LLM, and a
/// temp-dir history store.
pub async fn runtime(
    agents: Vec<AgentDef>,
    crons: Vec<CronDef>,
    buses: Vec<Arc<dyn MessageBus>>,
    configure: impl FnOnce(&mut RuntimeConfig),
) -> Runtime {
    let tmp = TempDir::new().unwrap();
    let mut config = RuntimeConfig::with_data_dir(tmp.path());
    config.cli_enabled = false;
    config.retry_backoff = Duration::from_millis(10);
    config.supervisor_interval = Duration::from_millis(50);
    configure(&mut config);

    let history = Arc::new(HistoryStore::open(config.history_dir()).await.unwrap());
    let session_map = Arc::new(
        SessionMap::open(
            config.session_map_path(),
            Arc::clone(&history),
            config.default_agent.clone(),
        )
        .await
        .unwrap(),
    );
    let llm = Arc::new(ScriptedLlmFactory::new());
    let crons = Arc::new(MemoryDefinitions::with(crons));

    let ctx = Arc::new(RuntimeContext {
        config,
        history,
        agents: Arc::new(MemoryDefinitions::with(agents)),
        crons: crons.clone(),
        skills: Arc::new(MemoryDefinitions::<SkillDef>::new()),
        llm: llm.clone(),
        queue: Arc::new(JobQueue::new()),
        session_map,
        buses,
    });

    Runtime {
        _tmp: tmp,
        ctx,
        llm,
        crons,
    }
}

/// Poll `check` until it holds or [`TEST_TIMEOUT`] passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
