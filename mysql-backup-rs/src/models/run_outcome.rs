//! Outcome of a backup run and the status file it is persisted to.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub timestamp: DateTime<Local>,
    pub success_count: usize,
    pub failed_count: usize,
    pub total_databases: usize,
    pub status: RunStatus,
    pub databases: Vec<String>,
}

impl RunOutcome {
    pub fn new(
        timestamp: DateTime<Local>,
        success_count: usize,
        failed_count: usize,
        databases: Vec<String>,
    ) -> Self {
        let status = if failed_count == 0 {
            RunStatus::Success
        } else {
            RunStatus::Error
        };
        Self {
            timestamp,
            success_count,
            failed_count,
            total_databases: success_count + failed_count,
            status,
            databases,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// 0 when every database was backed up, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Single-record status file. Each write replaces the previous record.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    path: PathBuf,
}

impl StatusLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a sibling temp file and renames it over the ledger so readers
    /// never observe a half-written record.
    pub async fn write(&self, outcome: &RunOutcome) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(outcome)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Missing or unreadable ledgers read as "no run recorded yet".
    pub async fn read(&self) -> Option<RunOutcome> {
        let body = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice(&body) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable status file");
                None
            }
        }
    }
}
