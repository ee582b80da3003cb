//! Structured events emitted by the orchestrators.
//!
//! Every event is logged through `tracing` and fanned out on a broadcast
//! channel. The dashboard WebSocket and the tests subscribe to the channel.

use crate::models::RunOutcome;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: Uuid,
        databases: Vec<String>,
    },
    DumpSucceeded {
        run_id: Uuid,
        database: String,
        file: String,
        size_bytes: u64,
    },
    DumpFailed {
        run_id: Uuid,
        database: String,
        reason: String,
    },
    Compressed {
        run_id: Uuid,
        database: String,
        file: String,
        size_bytes: u64,
    },
    CompressionFailed {
        run_id: Uuid,
        database: String,
        file: String,
        reason: String,
    },
    ArtifactExpired {
        file: String,
    },
    CleanupFailed {
        file: String,
        reason: String,
    },
    RunFinished {
        run_id: Uuid,
        outcome: RunOutcome,
    },
    StatusWriteFailed {
        reason: String,
    },
    ArtifactDeleted {
        file: String,
    },
    RestoreStarted {
        file: String,
        target: String,
        database: String,
    },
    DatabaseReset {
        target: String,
        database: String,
    },
    RestoreStreamWarning {
        file: String,
        reason: String,
    },
    RestoreFinished {
        file: String,
        target: String,
        database: String,
    },
    RestoreFailed {
        file: String,
        target: String,
        database: String,
        reason: String,
    },
}

impl Event {
    fn trace(&self) {
        match self {
            Event::RunStarted { run_id, databases } => {
                tracing::info!(%run_id, count = databases.len(), "Backup run started")
            }
            Event::DumpSucceeded { database, file, size_bytes, .. } => {
                tracing::info!(database = %database, file = %file, size_bytes, "Dump completed")
            }
            Event::DumpFailed { database, reason, .. } => {
                tracing::error!(database = %database, reason = %reason, "Dump failed")
            }
            Event::Compressed { database, file, size_bytes, .. } => {
                tracing::info!(database = %database, file = %file, size_bytes, "Dump compressed")
            }
            Event::CompressionFailed { database, file, reason, .. } => tracing::warn!(
                database = %database,
                file = %file,
                reason = %reason,
                "Compression failed, keeping uncompressed dump"
            ),
            Event::ArtifactExpired { file } => tracing::info!(file = %file, "Removed expired backup"),
            Event::CleanupFailed { file, reason } => {
                tracing::warn!(file = %file, reason = %reason, "Failed to remove expired backup")
            }
            Event::RunFinished { run_id, outcome } => tracing::info!(
                %run_id,
                success = outcome.success_count,
                failed = outcome.failed_count,
                "Backup run finished"
            ),
            Event::StatusWriteFailed { reason } => {
                tracing::warn!(reason = %reason, "Failed to write status file")
            }
            Event::ArtifactDeleted { file } => tracing::info!(file = %file, "Backup deleted"),
            Event::RestoreStarted { file, target, database } => {
                tracing::info!(file = %file, restore_target = %target, database = %database, "Restore started")
            }
            Event::DatabaseReset { target, database } => tracing::info!(
                restore_target = %target,
                database = %database,
                "Destination database dropped and recreated"
            ),
            Event::RestoreStreamWarning { file, reason } => {
                tracing::warn!(file = %file, reason = %reason, "Decompression stream reported an error")
            }
            Event::RestoreFinished { file, target, database } => {
                tracing::info!(file = %file, restore_target = %target, database = %database, "Restore completed")
            }
            Event::RestoreFailed { file, target, database, reason } => tracing::error!(
                file = %file,
                restore_target = %target,
                database = %database,
                reason = %reason,
                "Restore failed"
            ),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        event.trace();
        // No subscribers is the normal case for CLI runs.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
