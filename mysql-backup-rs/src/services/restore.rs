//! Restoring an artifact onto a registered target server.
//!
//! A restore happens in two phases. [`RestoreOrchestrator::prepare`] checks
//! every precondition and touches nothing remote. [`RestoreOrchestrator::execute`]
//! consumes the resulting [`RestorePlan`] and is destructive: it drops and
//! recreates the destination database, then replays the dump into it. There is
//! no rollback; a failed replay leaves the destination partially restored.

use crate::config::AppConfig;
use crate::events::{Event, EventBus};
use crate::models::{RegistryError, RestoreTarget, TargetRegistry};
use crate::services::archive::{self, ArchiveError, ArchiveStore};
use crate::services::command::{CommandOutput, CommandRunner, Invocation, RunError};
use crate::services::run_lock::RunLockError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Longest identifier MySQL accepts for a database.
const MAX_DATABASE_NAME_LEN: usize = 64;

/// Keep going past failing statements, keep comments (routine bodies need
/// them) and transfer in text mode.
const REPLAY_FLAGS: [&str; 3] = ["--force", "--comments", "--binary-mode=0"];

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub filename: String,
    pub target_index: i64,
    pub database_name: String,
}

/// A validated restore, ready to run.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    artifact: PathBuf,
    file_name: String,
    target: RestoreTarget,
    database: String,
}

impl RestorePlan {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn target(&self) -> &RestoreTarget {
        &self.target
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub filename: String,
    pub target: String,
    pub database: String,
    /// Statement errors the client reported while `--force` kept it going.
    pub warnings: String,
    /// Problem reading or decompressing the artifact, if any.
    pub stream_warning: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid target index {index}: {len} restore targets configured")]
    TargetIndex { index: i64, len: usize },

    #[error("Failed to recreate database: {stderr}")]
    Reset { stderr: String },

    #[error("Restore failed (exit {}): {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Replay { code: Option<i32>, stderr: String },

    #[error("{step} timed out after {}s", .after.as_secs())]
    Timeout { step: &'static str, after: Duration },

    #[error(transparent)]
    Command(RunError),

    #[error(transparent)]
    Busy(#[from] RunLockError),

    #[error("I/O error during restore: {0}")]
    Io(#[from] std::io::Error),
}

impl RestoreError {
    /// True for errors raised before anything was sent to the target server.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RestoreError::MissingField(_)
                | RestoreError::InvalidDatabaseName(_)
                | RestoreError::Archive(_)
                | RestoreError::Registry(_)
                | RestoreError::TargetIndex { .. }
                | RestoreError::Busy(_)
        )
    }

    fn from_run(step: &'static str, err: RunError) -> Self {
        match err {
            RunError::Timeout { after, .. } => RestoreError::Timeout { step, after },
            other => RestoreError::Command(other),
        }
    }
}

pub struct RestoreOrchestrator {
    archive: ArchiveStore,
    targets_file: PathBuf,
    client_program: String,
    reset_timeout: Duration,
    replay_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    events: EventBus,
}

impl RestoreOrchestrator {
    pub fn new(config: &AppConfig, runner: Arc<dyn CommandRunner>, events: EventBus) -> Self {
        Self {
            archive: ArchiveStore::new(&config.backup.backup_dir),
            targets_file: config.restore.targets_file.clone(),
            client_program: config.restore.client_program.clone(),
            reset_timeout: config.restore.reset_timeout(),
            replay_timeout: config.restore.replay_timeout(),
            runner,
            events,
        }
    }

    pub async fn registry(&self) -> Result<TargetRegistry, RegistryError> {
        TargetRegistry::load(&self.targets_file).await
    }

    /// Validates a request without contacting any server.
    pub async fn prepare(&self, request: &RestoreRequest) -> Result<RestorePlan, RestoreError> {
        let file_name = request.filename.trim();
        if file_name.is_empty() {
            return Err(RestoreError::MissingField("filename"));
        }
        let database = request.database_name.trim();
        if database.is_empty() {
            return Err(RestoreError::MissingField("database_name"));
        }
        if database.contains('`') || database.len() > MAX_DATABASE_NAME_LEN {
            return Err(RestoreError::InvalidDatabaseName(database.to_string()));
        }

        let artifact = self.archive.resolve(file_name).await?;
        let registry = self.registry().await?;
        let target = registry
            .get(request.target_index)
            .cloned()
            .ok_or(RestoreError::TargetIndex {
                index: request.target_index,
                len: registry.len(),
            })?;

        Ok(RestorePlan {
            artifact,
            file_name: file_name.to_string(),
            target,
            database: database.to_string(),
        })
    }

    /// Drops and recreates the destination, then replays the artifact into it.
    pub async fn execute(&self, plan: RestorePlan) -> Result<RestoreReport, RestoreError> {
        self.events.emit(Event::RestoreStarted {
            file: plan.file_name.clone(),
            target: plan.target.name.clone(),
            database: plan.database.clone(),
        });

        let result = self.run_steps(&plan).await;
        match &result {
            Ok(_) => self.events.emit(Event::RestoreFinished {
                file: plan.file_name.clone(),
                target: plan.target.name.clone(),
                database: plan.database.clone(),
            }),
            Err(e) => self.events.emit(Event::RestoreFailed {
                file: plan.file_name.clone(),
                target: plan.target.name.clone(),
                database: plan.database.clone(),
                reason: e.to_string(),
            }),
        }
        result
    }

    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreReport, RestoreError> {
        let plan = self.prepare(request).await?;
        self.execute(plan).await
    }

    async fn run_steps(&self, plan: &RestorePlan) -> Result<RestoreReport, RestoreError> {
        let reset = self.reset_database(plan).await?;
        if !reset.success() {
            return Err(RestoreError::Reset {
                stderr: reset.stderr.trim().to_string(),
            });
        }
        self.events.emit(Event::DatabaseReset {
            target: plan.target.name.clone(),
            database: plan.database.clone(),
        });

        let replay = self.replay(plan).await?;
        if let Some(reason) = &replay.stdin_error {
            self.events.emit(Event::RestoreStreamWarning {
                file: plan.file_name.clone(),
                reason: reason.clone(),
            });
        }
        if !replay.success() {
            return Err(RestoreError::Replay {
                code: replay.exit_code,
                stderr: replay.stderr.trim().to_string(),
            });
        }

        Ok(RestoreReport {
            filename: plan.file_name.clone(),
            target: plan.target.name.clone(),
            database: plan.database.clone(),
            warnings: replay.stderr.trim().to_string(),
            stream_warning: replay.stdin_error,
        })
    }

    async fn reset_database(&self, plan: &RestorePlan) -> Result<CommandOutput, RestoreError> {
        let sql = format!(
            "DROP DATABASE IF EXISTS `{db}`; CREATE DATABASE `{db}`;",
            db = plan.database
        );
        let invocation = Invocation::new(&self.client_program)
            .args(plan.target.connection.client_args())
            .arg("-e")
            .arg(sql)
            .timeout(self.reset_timeout);
        tracing::debug!(command = %invocation.redacted(), "Resetting destination database");

        self.runner
            .run(invocation)
            .await
            .map_err(|e| RestoreError::from_run("reset", e))
    }

    async fn replay(&self, plan: &RestorePlan) -> Result<CommandOutput, RestoreError> {
        let sql = archive::open_decompressed(&plan.artifact).await?;
        let invocation = Invocation::new(&self.client_program)
            .args(plan.target.connection.client_args())
            .args(REPLAY_FLAGS)
            .arg(&plan.database)
            .stdin_stream(Box::new(sql))
            .timeout(self.replay_timeout);
        tracing::debug!(command = %invocation.redacted(), "Replaying dump");

        self.runner
            .run(invocation)
            .await
            .map_err(|e| RestoreError::from_run("replay", e))
    }
}
