//! Runtime fixture for unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::agent::SessionMap;
use crate::channels::MessageBus;
use crate::config::RuntimeConfig;
use crate::context::RuntimeContext;
use crate::defs::{AgentDef, CronDef, MemoryDefinitions, SkillDef};
use crate::history::HistoryStore;
use crate::worker::JobQueue;

pub use crate::testing::{RecordingBus, RecordingFrontend, ScriptStep, ScriptedLlmFactory};

/// A runtime context over in-memory definitions and a temp-dir history.
pub struct TestRuntime {
    _tmp: TempDir,
    pub ctx: Arc<RuntimeContext>,
    pub llm: Arc<ScriptedLlmFactory>,
    pub agents: Arc<MemoryDefinitions<AgentDef>>,
    pub crons: Arc<MemoryDefinitions<CronDef>>,
}

impl TestRuntime {
    pub async fn new(agents: Vec<AgentDef>) -> Self {
        Self::builder(agents).build().await
    }

    pub fn builder(agents: Vec<AgentDef>) -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            agents,
            crons: Vec::new(),
            skills: Arc::new(MemoryDefinitions::new()),
            buses: Vec::new(),
            config: RuntimeConfig::default(),
        }
    }
}

pub struct TestRuntimeBuilder {
    agents: Vec<AgentDef>,
    crons: Vec<CronDef>,
    skills: Arc<MemoryDefinitions<SkillDef>>,
    buses: Vec<Arc<dyn MessageBus>>,
    config: RuntimeConfig,
}

impl TestRuntimeBuilder {
    pub fn crons(mut self, crons: Vec<CronDef>) -> Self {
        self.crons = crons;
        self
    }

    pub fn skills(mut self, skills: MemoryDefinitions<SkillDef>) -> Self {
        self.skills = Arc::new(skills);
        self
    }

    pub fn buses(mut self, buses: Vec<Arc<dyn MessageBus>>) -> Self {
        self.buses = buses;
        self
    }

    pub fn chat_history(mut self, max: usize) -> Self {
        self.config.chat_max_history = max;
        self
    }

    pub fn max_tool_iterations(mut self, max: usize) -> Self {
        self.config.max_tool_iterations = max;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut RuntimeConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub async fn build(self) -> TestRuntime {
        let tmp = TempDir::new().unwrap();
        let mut config = self.config;
        config.data_dir = tmp.path().to_path_buf();

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
        let agents = Arc::new(MemoryDefinitions::with(self.agents));
        let crons = Arc::new(MemoryDefinitions::with(self.crons));

        let ctx = Arc::new(RuntimeContext {
            config,
            history,
            agents: agents.clone(),
            crons: crons.clone(),
            skills: self.skills,
            llm: llm.clone(),
            queue: Arc::new(JobQueue::new()),
            session_map,
            buses: self.buses,
        });

        TestRuntime {
            _tmp: tmp,
            ctx,
            llm,
            agents,
            crons,
        }
    }
}
