//! Workers: long-running loops supervised by the server.
//!
//! - `job` — jobs and the shared queue
//! - `router` — single queue consumer, per-agent admission control
//! - `executor` — runs one job, decides drop vs requeue on failure
//! - `cron` — enqueues scheduled jobs
//! - `bus` — turns chat-platform messages into jobs or command replies

pub mod bus;
pub mod cron;
pub mod executor;
pub mod job;
pub mod router;

pub use bus::MessageBusWorker;
pub use cron::CronWorker;
pub use executor::SessionExecutor;
pub use job::{CONTINUATION_MESSAGE, Job, JobMode, JobQueue, JobResult};
pub use router::AgentJobRouter;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::Error;

/// A supervised loop.
///
/// `run` only returns on an unrecovered error (or, unexpectedly, `Ok`).
/// Stopping happens by cancelling the task that drives it, so `run` must
/// leave nothing inconsistent at any await point.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), Error>;
}

/// How a worker task ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// `run` returned `Ok` although it should loop forever.
    Returned,
    Failed(Error),
    Panicked(String),
}

/// Owns a worker and the task currently running it.
///
/// idle → running → stopped | crashed
pub struct WorkerHandle {
    worker: Arc<dyn Worker>,
    task: Option<JoinHandle<Result<(), Error>>>,
}

impl WorkerHandle {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker, task: None }
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Launch the loop. No-op while it is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let worker = Arc::clone(&self.worker);
        self.task = Some(tokio::spawn(async move { worker.run().await }));
        tracing::debug!(worker = %self.worker.name(), "Worker started");
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The task finished on its own. A stopped worker has no task and never
    /// counts as crashed.
    pub fn has_crashed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| t.is_finished())
    }

    /// Take the result of a finished task. `None` if the task is still
    /// running or was never started.
    pub async fn collect_exit(&mut self) -> Option<WorkerExit> {
        if !self.has_crashed() {
            return None;
        }
        let task = self.task.take()?;
        Some(match task.await {
            Ok(Ok(())) => WorkerExit::Returned,
            Ok(Err(e)) => WorkerExit::Failed(e),
            Err(e) if e.is_panic() => WorkerExit::Panicked(e.to_string()),
            Err(e) => WorkerExit::Panicked(format!("task ended abnormally: {e}")),
        })
    }

    /// Cancel the task and wait for it to settle.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        match task.await {
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(
                    worker = %self.worker.name(),
                    "Worker panicked while stopping: {}",
                    e
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = %self.worker.name(), "Worker failed before stop: {}", e)
            }
            Ok(Ok(())) => {}
        }
        tracing::debug!(worker = %self.worker.name(), "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::BusError;

    struct Forever;

    #[async_trait]
    impl Worker for Forever {
        fn name(&self) -> &str {
            "forever"
        }

        async fn run(&self) -> Result<(), Error> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Worker for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self) -> Result<(), Error> {
            Err(BusError::StreamsEnded.into())
        }
    }

    #[tokio::test]
    async fn lifecycle() {
        let mut handle = WorkerHandle::new(Arc::new(Forever));
        assert!(!handle.is_running());
        assert!(!handle.has_crashed());

        handle.start();
        tokio::task::yield_now().await;
        assert!(handle.is_running());

        handle.stop().await;
        assert!(!handle.is_running());
        assert!(!handle.has_crashed());
        assert!(handle.collect_exit().await.is_none());
    }

    #[tokio::test]
    async fn crash_is_reported_with_cause() {
        let mut handle = WorkerHandle::new(Arc::new(Failing));
        handle.start();
        for _ in 0..50 {
            if handle.has_crashed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.has_crashed());
        match handle.collect_exit().await {
            Some(WorkerExit::Failed(Error::Bus(BusError::StreamsEnded))) => {}
            other => panic!("unexpected exit: {other:?}"),
        }

        // Restartable after a crash.
        handle.start();
        assert!(handle.task.is_some());
        handle.stop().await;
    }
}
