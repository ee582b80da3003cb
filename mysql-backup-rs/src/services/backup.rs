//! Backup runs: dump each configured database, compress, prune the archive and
//! record the outcome.

use crate::config::AppConfig;
use crate::events::{Event, EventBus};
use crate::models::{ArtifactName, MySqlConnection, RunOutcome, StatusLedger};
use crate::services::archive::{self, ArchiveStore};
use crate::services::command::{CommandRunner, Invocation, RunError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Flags every dump carries: a consistent snapshot plus routines, triggers and
/// scheduled events.
const DUMP_FLAGS: [&str; 4] = ["--single-transaction", "--routines", "--triggers", "--events"];

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct BackupJob {
    pub database: String,
    pub connection: MySqlConnection,
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("dump exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    Failed { code: Option<i32>, stderr: String },

    #[error("dump produced an empty file")]
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub struct BackupOrchestrator {
    connection: MySqlConnection,
    databases: Vec<String>,
    dump_program: String,
    retention_days: u32,
    archive: ArchiveStore,
    ledger: StatusLedger,
    runner: Arc<dyn CommandRunner>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl BackupOrchestrator {
    pub fn new(config: &AppConfig, runner: Arc<dyn CommandRunner>, events: EventBus) -> Self {
        Self {
            connection: config.source.clone(),
            databases: config.backup.databases.clone(),
            dump_program: config.backup.dump_program.clone(),
            retention_days: config.backup.retention_days,
            archive: ArchiveStore::new(&config.backup.backup_dir),
            ledger: StatusLedger::new(&config.backup.status_file),
            runner,
            events,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// One job per configured database, all against the source server.
    pub fn jobs(&self) -> Vec<BackupJob> {
        self.databases
            .iter()
            .map(|database| BackupJob {
                database: database.clone(),
                connection: self.connection.clone(),
            })
            .collect()
    }

    /// Full run over the configured databases.
    pub async fn run(&self) -> RunOutcome {
        self.run_all_backups(&self.jobs()).await
    }

    /// Dumps the jobs one after another, then applies retention and writes the
    /// status ledger. Never fails as a whole; per-database failures are counted.
    pub async fn run_all_backups(&self, jobs: &[BackupJob]) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let databases: Vec<String> = jobs.iter().map(|j| j.database.clone()).collect();
        self.events.emit(Event::RunStarted {
            run_id,
            databases: databases.clone(),
        });

        let mut success = 0;
        let mut failed = 0;
        for job in jobs {
            match self.backup_one(run_id, job).await {
                Ok(_) => success += 1,
                Err(e) => {
                    self.events.emit(Event::DumpFailed {
                        run_id,
                        database: job.database.clone(),
                        reason: e.to_string(),
                    });
                    failed += 1;
                }
            }
        }

        self.cleanup_expired(self.retention_days).await;

        let outcome = RunOutcome::new(self.clock.now(), success, failed, databases);
        if let Err(e) = self.ledger.write(&outcome).await {
            self.events.emit(Event::StatusWriteFailed {
                reason: e.to_string(),
            });
        }
        self.events.emit(Event::RunFinished {
            run_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Dumps one database and compresses the result. Returns the artifact path,
    /// which stays uncompressed when compression fails.
    async fn backup_one(&self, run_id: Uuid, job: &BackupJob) -> Result<PathBuf, DumpError> {
        self.archive.ensure_exists().await?;

        let name = ArtifactName::new(&job.database, self.clock.now().naive_local());
        let dump_path = self.archive.root().join(name.dump_file_name());
        let size_bytes = match self.dump(job, &dump_path).await {
            Ok(size) => size,
            Err(e) => {
                // Only complete dumps may stay in the archive.
                let _ = tokio::fs::remove_file(&dump_path).await;
                return Err(e);
            }
        };
        self.events.emit(Event::DumpSucceeded {
            run_id,
            database: job.database.clone(),
            file: name.dump_file_name(),
            size_bytes,
        });

        match archive::compress_dump(&dump_path).await {
            Ok(gz_path) => {
                let size_bytes = tokio::fs::metadata(&gz_path).await.map(|m| m.len()).unwrap_or(0);
                self.events.emit(Event::Compressed {
                    run_id,
                    database: job.database.clone(),
                    file: name.compressed_file_name(),
                    size_bytes,
                });
                Ok(gz_path)
            }
            Err(e) => {
                self.events.emit(Event::CompressionFailed {
                    run_id,
                    database: job.database.clone(),
                    file: name.dump_file_name(),
                    reason: e.to_string(),
                });
                Ok(dump_path)
            }
        }
    }

    async fn dump(&self, job: &BackupJob, dump_path: &Path) -> Result<u64, DumpError> {
        let file = tokio::fs::File::create(dump_path).await?.into_std().await;
        let invocation = Invocation::new(&self.dump_program)
            .args(job.connection.client_args())
            .args(DUMP_FLAGS)
            .arg(&job.database)
            .stdout_to_file(file);
        tracing::debug!(command = %invocation.redacted(), "Running dump");

        let output = self.runner.run(invocation).await?;
        if !output.success() {
            return Err(DumpError::Failed {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let size = tokio::fs::metadata(dump_path).await?.len();
        if size == 0 {
            return Err(DumpError::Empty);
        }
        Ok(size)
    }

    pub async fn cleanup_expired(&self, retention_days: u32) -> CleanupReport {
        self.cleanup_expired_at(self.clock.now(), retention_days).await
    }

    /// Removes dumps last modified strictly before `now - retention_days`.
    /// Failures are reported and skipped.
    pub async fn cleanup_expired_at(&self, now: DateTime<Local>, retention_days: u32) -> CleanupReport {
        let mut report = CleanupReport::default();
        let cutoff: SystemTime = (now - chrono::Duration::days(i64::from(retention_days))).into();

        let expired = match self.archive.expired(cutoff).await {
            Ok(expired) => expired,
            Err(e) => {
                self.events.emit(Event::CleanupFailed {
                    file: self.archive.root().display().to_string(),
                    reason: e.to_string(),
                });
                return report;
            }
        };

        for path in expired {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    self.events.emit(Event::ArtifactExpired { file });
                    report.removed.push(path);
                }
                Err(e) => {
                    self.events.emit(Event::CleanupFailed {
                        file,
                        reason: e.to_string(),
                    });
                    report.failed.push(path);
                }
            }
        }
        report
    }
}
