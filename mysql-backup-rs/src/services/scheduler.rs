use crate::state::AppState;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    /// Registers the full backup run on a six-field cron expression in local
    /// time. A tick that lands while another job holds the run lock is skipped.
    pub async fn schedule_backups(&self, cron_expression: &str) -> anyhow::Result<Uuid> {
        let state = self.state.clone();

        let job = Job::new_async_tz(cron_expression, Local, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled backup");
                match state.try_run_backup().await {
                    Ok(outcome) if outcome.is_success() => {}
                    Ok(outcome) => tracing::warn!(
                        failed = outcome.failed_count,
                        total = outcome.total_databases,
                        "Scheduled backup finished with failures"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Skipping scheduled backup"),
                }
            })
        })?;

        let id = self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup scheduled");
        Ok(id)
    }

    pub async fn next_run(&self, job: Uuid) -> anyhow::Result<Option<DateTime<Local>>> {
        let next = self.scheduler.lock().await.next_tick_for_job(job).await?;
        Ok(next.map(|tick| tick.with_timezone(&Local)))
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
