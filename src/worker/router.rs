//! The single consumer of the job queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::RuntimeContext;
use crate::error::Error;
use crate::worker::{Job, SessionExecutor, Worker};

/// Pulls jobs off the queue and starts an executor for each without waiting
/// on it. Each agent gets a semaphore sized to its `max_concurrency`, created
/// on the first job for that agent; executors block on it, the router never does.
pub struct AgentJobRouter {
    ctx: Arc<RuntimeContext>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl AgentJobRouter {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Semaphore for an agent. Unknown agents get a throwaway one: their job
    /// is dropped by the executor anyway.
    async fn semaphore_for(&self, agent_id: &str) -> Arc<Semaphore> {
        let existing = self.lock().get(agent_id).cloned();
        if let Some(existing) = existing {
            return existing;
        }

        let limit = match self.ctx.agents.load(agent_id).await {
            Ok(def) => def.concurrency_limit(),
            Err(_) => return Arc::new(Semaphore::new(1)),
        };

        let mut semaphores = self.lock();
        let semaphore = semaphores
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(agent = %agent_id, limit, "Created admission semaphore");
                Arc::new(Semaphore::new(limit))
            });
        Arc::clone(semaphore)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        match self.semaphores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn dispatch(&self, job: Job, running: &mut JoinSet<()>) {
        let semaphore = self.semaphore_for(&job.agent_id).await;
        let executor = SessionExecutor::new(Arc::clone(&self.ctx), semaphore);
        running.spawn(executor.run(job));
    }
}

#[async_trait]
impl Worker for AgentJobRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn run(&self) -> Result<(), Error> {
        // Dropping the set on cancellation aborts every executor, which
        // releases their permits.
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                job = self.ctx.queue.pop() => {
                    self.dispatch(job, &mut running).await;
                }
                Some(done) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = done
                        && e.is_panic()
                    {
                        tracing::error!("Session executor panicked: {}", e);
                    }
                }
            }
        }
    }
}
