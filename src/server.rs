//! Worker supervision.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::api::HttpWorker;
use crate::context::RuntimeContext;
use crate::worker::{
    AgentJobRouter, CronWorker, MessageBusWorker, Worker, WorkerExit, WorkerHandle,
};

/// Starts the workers and restarts any that die until shutdown.
pub struct Server {
    ctx: Arc<RuntimeContext>,
    workers: Vec<WorkerHandle>,
}

impl Server {
    /// Router and cron always; the bus worker when a bus is configured; the
    /// HTTP worker when a port is configured.
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        let mut workers: Vec<Arc<dyn Worker>> = vec![
            Arc::new(AgentJobRouter::new(Arc::clone(&ctx))),
            Arc::new(CronWorker::new(Arc::clone(&ctx))),
        ];
        if !ctx.buses.is_empty() {
            workers.push(Arc::new(MessageBusWorker::new(Arc::clone(&ctx))));
        }
        if let Some(port) = ctx.config.http_port {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            workers.push(Arc::new(HttpWorker::new(Arc::clone(&ctx), addr)));
        }

        Self {
            ctx,
            workers: workers.into_iter().map(WorkerHandle::new).collect(),
        }
    }

    /// Add another supervised worker.
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(WorkerHandle::new(worker));
        self
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }

    /// Run until `shutdown` resolves, then stop every worker and bus.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        for worker in &mut self.workers {
            worker.start();
        }
        tracing::info!(workers = ?self.worker_names(), "Server started");

        let mut ticker = tokio::time::interval(self.ctx.config.supervisor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.supervise().await,
            }
        }

        self.stop().await;
    }

    /// Restart every worker whose task ended on its own.
    async fn supervise(&mut self) {
        for worker in &mut self.workers {
            let Some(exit) = worker.collect_exit().await else {
                continue;
            };
            match exit {
                WorkerExit::Failed(e) => {
                    tracing::error!(worker = %worker.name(), "Worker crashed: {}", e)
                }
                WorkerExit::Panicked(reason) => {
                    tracing::error!(worker = %worker.name(), "Worker panicked: {}", reason)
                }
                WorkerExit::Returned => {
                    tracing::warn!(worker = %worker.name(), "Worker exited unexpectedly")
                }
            }
            worker.start();
            tracing::info!(worker = %worker.name(), "Worker restarted");
        }
    }

    async fn stop(&mut self) {
        tracing::info!("Shutting down");
        for worker in &mut self.workers {
            worker.stop().await;
        }
        for bus in &self.ctx.buses {
            if let Err(e) = bus.stop().await {
                tracing::warn!(bus = %bus.name(), "Bus failed to stop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::defs::AgentDef;
    use crate::error::{BusError, Error};
    use crate::test_support::{RecordingBus, TestRuntime};

    struct Flaky {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Worker for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self) -> Result<(), Error> {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(BusError::StreamsEnded.into());
            }
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_set_depends_on_configuration() {
        let rt = TestRuntime::new(vec![AgentDef::new("assistant", "p")]).await;
        assert_eq!(Server::new(Arc::clone(&rt.ctx)).worker_names(), vec!["router", "cron"]);

        let bus: Arc<dyn crate::channels::MessageBus> = Arc::new(RecordingBus::new("test"));
        let rt = TestRuntime::builder(vec![AgentDef::new("assistant", "p")])
            .buses(vec![bus])
            .configure(|c| c.http_port = Some(0))
            .build()
            .await;
        assert_eq!(
            Server::new(Arc::clone(&rt.ctx)).worker_names(),
            vec!["router", "cron", "message-bus", "http"]
        );
    }

    #[tokio::test]
    async fn crashed_worker_is_restarted() {
        let rt = TestRuntime::builder(vec![AgentDef::new("assistant", "p")])
            .configure(|c| c.supervisor_interval = Duration::from_millis(10))
            .build()
            .await;
        let flaky = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let server = Server::new(Arc::clone(&rt.ctx)).with_worker(flaky.clone());

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        for _ in 0..100 {
            if flaky.runs.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 2);

        stop_tx.send(()).unwrap();
        running.await.unwrap();
    }
}
