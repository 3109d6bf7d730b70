//! Runs one job to completion under its agent's admission semaphore.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;

use crate::agent::{Agent, AgentSession};
use crate::context::RuntimeContext;
use crate::error::{Error, ErrorClass, JobError};
use crate::worker::Job;

/// Executes a job: acquire permit, load agent, resume or create the session,
/// chat, release.
///
/// Failure policy, by [`ErrorClass`]:
/// - missing session on pickup: recreated under the same id
/// - `NotFound`, `Validation`, `Fatal`: job dropped
/// - `Transient`: requeued with the continuation message, up to
///   `max_job_retries` times, with linear backoff and jitter
pub struct SessionExecutor {
    ctx: Arc<RuntimeContext>,
    semaphore: Arc<Semaphore>,
}

impl SessionExecutor {
    pub fn new(ctx: Arc<RuntimeContext>, semaphore: Arc<Semaphore>) -> Self {
        Self { ctx, semaphore }
    }

    pub async fn run(self, mut job: Job) {
        let outcome = {
            let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                job.resolve(Err("agent admission closed".to_string()));
                return;
            };
            self.execute(&mut job).await
        };

        match outcome {
            Ok(answer) => job.resolve(Ok(answer)),
            Err(e) => self.handle_failure(job, e).await,
        }
    }

    async fn execute(&self, job: &mut Job) -> Result<String, Error> {
        let agent = Agent::load(&job.agent_id, Arc::clone(&self.ctx)).await?;
        let mut session = self.open_session(&agent, job).await?;
        session.chat(&job.message, Arc::clone(&job.frontend)).await
    }

    async fn open_session(&self, agent: &Arc<Agent>, job: &mut Job) -> Result<AgentSession, Error> {
        let Some(session_id) = job.session_id.clone() else {
            let session = agent.new_session(job.mode, None).await?;
            job.session_id = Some(session.session_id().to_string());
            return Ok(session);
        };

        match agent.resume_session_as(&session_id, job.mode).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_session_not_found() => {
                tracing::warn!(
                    agent = %job.agent_id,
                    session = %session_id,
                    "Session missing from history, starting it fresh"
                );
                agent.new_session(job.mode, Some(session_id)).await
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_failure(&self, mut job: Job, error: Error) {
        let class = error.class();
        if class != ErrorClass::Transient {
            tracing::warn!(agent = %job.agent_id, class = ?class, "Dropping job: {}", error);
            let dropped = JobError::Dropped {
                agent_id: job.agent_id.clone(),
                reason: error.to_string(),
            };
            job.resolve(Err(dropped.to_string()));
            return;
        }

        let max_retries = self.ctx.config.max_job_retries;
        if job.retry_count >= max_retries {
            let exhausted = JobError::RetriesExhausted {
                agent_id: job.agent_id.clone(),
                retries: job.retry_count,
                reason: error.to_string(),
            };
            tracing::error!(
                agent = %job.agent_id,
                session = ?job.session_id,
                job_retry = job.retry_count,
                "{}",
                exhausted
            );
            job.frontend
                .show_system_message(
                    "Sorry, something went wrong and I had to give up on this one.",
                )
                .await;
            job.resolve(Err(exhausted.to_string()));
            return;
        }

        job.prepare_retry();
        let delay = backoff(self.ctx.config.retry_backoff, job.retry_count);
        tracing::warn!(
            agent = %job.agent_id,
            session = ?job.session_id,
            job_retry = job.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Requeueing job after failure: {}",
            error
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.ctx.queue.push(job);
    }
}

/// `base * attempt`, plus up to 25% jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let scaled = base.saturating_mul(attempt);
    let jitter_cap = scaled.as_millis() as u64 / 4;
    if jitter_cap == 0 {
        return scaled;
    }
    let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
    scaled + Duration::from_millis(jitter)
}
