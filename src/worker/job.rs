//! Jobs and the shared job queue.
//!
//! Producers (cron, message buses, the HTTP surface, the dispatch tool) push
//! jobs; the router is the only consumer. Ownership of a job moves with it
//! through the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};

use crate::channels::Frontend;

/// Message a requeued job carries so the agent continues where it stopped.
pub const CONTINUATION_MESSAGE: &str = ".";

/// How a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Interactive conversation: shorter history, no proactive posting.
    #[default]
    Chat,
    /// Background task: longer history, may post to buses.
    Job,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMode::Chat => write!(f, "chat"),
            JobMode::Job => write!(f, "job"),
        }
    }
}

/// Outcome delivered to a caller waiting on a job.
pub type JobResult = Result<String, String>;

/// One unit of agent work.
pub struct Job {
    /// `None` until first pickup, when a fresh session is created.
    pub session_id: Option<String>,
    pub agent_id: String,
    pub message: String,
    pub frontend: Arc<dyn Frontend>,
    pub mode: JobMode,
    /// Set when a caller awaits the final answer.
    pub result_tx: Option<oneshot::Sender<JobResult>>,
    pub retry_count: u32,
}

impl Job {
    pub fn new(
        agent_id: impl Into<String>,
        message: impl Into<String>,
        frontend: Arc<dyn Frontend>,
        mode: JobMode,
    ) -> Self {
        Self {
            session_id: None,
            agent_id: agent_id.into(),
            message: message.into(),
            frontend,
            mode,
            result_tx: None,
            retry_count: 0,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a result channel and return its receiving half.
    pub fn awaiting(mut self) -> (Self, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        self.result_tx = Some(tx);
        (self, rx)
    }

    /// Resolve a waiting caller, if any. Later calls are no-ops.
    pub fn resolve(&mut self, result: JobResult) {
        if let Some(tx) = self.result_tx.take() {
            // The caller may have gone away.
            let _ = tx.send(result);
        }
    }

    /// Prepare for another attempt after a transient failure.
    pub fn prepare_retry(&mut self) {
        self.retry_count += 1;
        self.message = CONTINUATION_MESSAGE.to_string();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("session_id", &self.session_id)
            .field("agent_id", &self.agent_id)
            .field("message", &self.message)
            .field("mode", &self.mode)
            .field("awaited", &self.result_tx.is_some())
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// FIFO queue shared by all producers and the router.
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Job) {
        tracing::debug!(
            agent = %job.agent_id,
            mode = %job.mode,
            retry = job.retry_count,
            "Job queued"
        );
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.push_back(job),
            Err(poisoned) => poisoned.into_inner().push_back(job),
        }
        self.notify.notify_one();
    }

    /// Take the next job without waiting.
    pub fn try_pop(&self) -> Option<Job> {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    /// Wait for the next job. Cancel-safe: no job is lost if the future is dropped.
    pub async fn pop(&self) -> Job {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.try_pop() {
                return job;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        match self.jobs.lock() {
            Ok(jobs) => jobs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LogFrontend;
    use std::time::Duration;

    fn job(agent: &str, message: &str) -> Job {
        Job::new(agent, message, Arc::new(LogFrontend::new("test")), JobMode::Chat)
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = JobQueue::new();
        queue.push(job("a", "1"));
        queue.push(job("b", "2"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.message, "1");
        assert_eq!(queue.pop().await.message, "2");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.pop().await.agent_id });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(job("late", "x"));

        let agent = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent, "late");
    }

    #[tokio::test]
    async fn cancelled_pop_loses_nothing() {
        let queue = JobQueue::new();
        let _ = tokio::time::timeout(Duration::from_millis(5), queue.pop()).await;
        queue.push(job("a", "kept"));
        assert_eq!(queue.pop().await.message, "kept");
    }

    #[test]
    fn retry_sets_continuation() {
        let mut j = job("a", "original prompt");
        j.prepare_retry();
        j.prepare_retry();
        assert_eq!(j.retry_count, 2);
        assert_eq!(j.message, CONTINUATION_MESSAGE);
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let (mut j, rx) = job("a", "x").awaiting();
        j.resolve(Ok("done".into()));
        j.resolve(Err("ignored".into()));
        assert_eq!(rx.await.unwrap(), Ok("done".to_string()));
    }
}
