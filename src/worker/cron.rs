//! Scheduled jobs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Local, TimeDelta};
use tokio::time::MissedTickBehavior;

use crate::channels::LogFrontend;
use crate::context::RuntimeContext;
use crate::defs::CronDef;
use crate::error::Error;
use crate::worker::{Job, JobMode, Worker};

/// Re-reads cron definitions every `cron_interval` and enqueues a fresh JOB
/// for each one due in the current minute.
pub struct CronWorker {
    ctx: Arc<RuntimeContext>,
    last_minute: Mutex<Option<DateTime<Local>>>,
}

impl CronWorker {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            last_minute: Mutex::new(None),
        }
    }

    /// Enabled definitions whose schedule fires in the minute containing `now`.
    pub async fn due_definitions(&self, now: DateTime<Local>) -> Result<Vec<CronDef>, Error> {
        let crons = self.ctx.crons.discover().await?;
        Ok(crons
            .into_iter()
            .filter(|def| def.enabled)
            .filter(|def| match def.parsed_schedule() {
                Ok(schedule) => schedule.is_due(&now),
                Err(e) => {
                    tracing::warn!(cron = %def.id, "Skipping cron: {}", e);
                    false
                }
            })
            .collect())
    }

    /// Enqueue everything due at `now` and return how many jobs were queued.
    ///
    /// A minute is only evaluated once, however many ticks land in it.
    /// One-shot definitions are deleted right after their job is queued.
    pub async fn run_once(&self, now: DateTime<Local>) -> Result<usize, Error> {
        let minute = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
        {
            let mut last = match self.last_minute.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *last == Some(minute) {
                return Ok(0);
            }
            *last = Some(minute);
        }

        let due = self.due_definitions(now).await?;
        for def in &due {
            let frontend = Arc::new(LogFrontend::new(format!("cron:{}", def.id)));
            self.ctx
                .queue
                .push(Job::new(&def.agent_id, &def.message, frontend, JobMode::Job));
            tracing::info!(cron = %def.id, agent = %def.agent_id, "Cron fired");

            if def.one_shot {
                match self.ctx.crons.delete(&def.id).await {
                    Ok(()) => tracing::info!(cron = %def.id, "Deleted one-shot cron"),
                    Err(e) => {
                        tracing::error!(cron = %def.id, "Failed to delete one-shot cron: {}", e)
                    }
                }
            }
        }
        Ok(due.len())
    }
}

#[async_trait]
impl Worker for CronWorker {
    fn name(&self) -> &str {
        "cron"
    }

    async fn run(&self) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.ctx.config.cron_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first check happens one
        // interval after start.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once(Local::now()).await {
                tracing::error!("Cron pass failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::defs::AgentDef;
    use crate::test_support::TestRuntime;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 4, hour, minute, 12)
            .single()
            .unwrap()
    }

    async fn runtime(crons: Vec<CronDef>) -> TestRuntime {
        TestRuntime::builder(vec![AgentDef::new("assistant", "p")])
            .crons(crons)
            .build()
            .await
    }

    #[tokio::test]
    async fn only_matching_schedules_are_due() {
        let rt = runtime(vec![
            CronDef::new("every-five", "assistant", "*/5 * * * *", "check"),
            CronDef::new("midnight", "assistant", "0 0 * * *", "report"),
        ])
        .await;
        let worker = CronWorker::new(Arc::clone(&rt.ctx));

        let due = worker.due_definitions(at(10, 10)).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["every-five"]);
    }

    #[tokio::test]
    async fn due_job_is_a_fresh_job_mode_job() {
        let rt = runtime(vec![CronDef::new("c", "assistant", "*/5 * * * *", "check mail")]).await;
        let worker = CronWorker::new(Arc::clone(&rt.ctx));

        assert_eq!(worker.run_once(at(9, 5)).await.unwrap(), 1);
        let job = rt.ctx.queue.try_pop().unwrap();
        assert_eq!(job.agent_id, "assistant");
        assert_eq!(job.message, "check mail");
        assert_eq!(job.mode, JobMode::Job);
        assert!(job.session_id.is_none());
    }

    #[tokio::test]
    async fn one_shot_is_deleted_once_enqueued() {
        let rt = runtime(vec![
            CronDef::new("once", "assistant", "*/5 * * * *", "remind me").one_shot(),
        ])
        .await;
        let worker = CronWorker::new(Arc::clone(&rt.ctx));

        worker.run_once(at(9, 5)).await.unwrap();
        // Queued but not executed, and already gone.
        assert_eq!(rt.ctx.queue.len(), 1);
        assert!(!rt.crons.contains("once"));
    }

    #[tokio::test]
    async fn disabled_and_repeated_minutes_are_skipped() {
        let mut disabled = CronDef::new("off", "assistant", "*/5 * * * *", "x");
        disabled.enabled = false;
        let rt = runtime(vec![
            disabled,
            CronDef::new("on", "assistant", "*/5 * * * *", "y"),
        ])
        .await;
        let worker = CronWorker::new(Arc::clone(&rt.ctx));

        assert_eq!(worker.run_once(at(9, 5)).await.unwrap(), 1);
        assert_eq!(worker.run_once(at(9, 5)).await.unwrap(), 0);
        assert_eq!(worker.run_once(at(9, 10)).await.unwrap(), 1);
        assert_eq!(rt.ctx.queue.len(), 2);
    }
}
