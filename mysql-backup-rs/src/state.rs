use crate::config::AppConfig;
use crate::events::EventBus;
use crate::models::{RunOutcome, StatusLedger};
use crate::services::archive::ArchiveStore;
use crate::services::backup::{BackupOrchestrator, Clock};
use crate::services::command::CommandRunner;
use crate::services::restore::{RestoreError, RestoreOrchestrator, RestoreReport, RestoreRequest};
use crate::services::run_lock::{JobKind, RunLock, RunLockError};
use std::future::Future;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub events: EventBus,
    pub run_lock: RunLock,
    pub archive: ArchiveStore,
    pub ledger: StatusLedger,
    pub backups: BackupOrchestrator,
    pub restores: RestoreOrchestrator,
}

impl AppState {
    pub fn new(config: AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let events = EventBus::new();
        Self {
            archive: ArchiveStore::new(&config.backup.backup_dir),
            ledger: StatusLedger::new(&config.backup.status_file),
            backups: BackupOrchestrator::new(&config, runner.clone(), events.clone()),
            restores: RestoreOrchestrator::new(&config, runner, events.clone()),
            run_lock: RunLock::new(),
            events,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.backups = self.backups.with_clock(clock);
        self
    }

    /// Full backup run, refused while a backup or restore is in progress.
    /// The run continues even if the caller stops waiting for it.
    pub async fn try_run_backup(self: &Arc<Self>) -> Result<RunOutcome, RunLockError> {
        let guard = self.run_lock.try_acquire(JobKind::Backup)?;
        let state = self.clone();
        Ok(detached(async move {
            let outcome = state.backups.run().await;
            drop(guard);
            outcome
        })
        .await)
    }

    /// Validates and runs a restore under the run lock. Once started, the
    /// restore runs to completion regardless of the caller.
    pub async fn try_restore(self: &Arc<Self>, request: &RestoreRequest) -> Result<RestoreReport, RestoreError> {
        let guard = self.run_lock.try_acquire(JobKind::Restore)?;
        let plan = self.restores.prepare(request).await?;
        let state = self.clone();
        detached(async move {
            let report = state.restores.execute(plan).await;
            drop(guard);
            report
        })
        .await
    }
}

/// Runs `job` on its own task so dropping the awaiting future leaves it running.
async fn detached<T: Send + 'static>(job: impl Future<Output = T> + Send + 'static) -> T {
    match tokio::spawn(job).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}
