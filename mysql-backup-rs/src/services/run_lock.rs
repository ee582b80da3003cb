use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Backup,
    Restore,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Backup => f.write_str("backup"),
            JobKind::Restore => f.write_str("restore"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot start {requested}: a {active} is already in progress")]
pub struct RunLockError {
    pub requested: JobKind,
    pub active: JobKind,
}

/// One job at a time per process. Backup runs and restores share the lock;
/// a second trigger is refused rather than queued.
#[derive(Clone, Default)]
pub struct RunLock {
    gate: Arc<tokio::sync::Mutex<()>>,
    active: Arc<Mutex<Option<JobKind>>>,
}

pub struct RunGuard {
    kind: JobKind,
    active: Arc<Mutex<Option<JobKind>>>,
    _gate: OwnedMutexGuard<()>,
}

fn slot(active: &Mutex<Option<JobKind>>) -> MutexGuard<'_, Option<JobKind>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, kind: JobKind) -> Result<RunGuard, RunLockError> {
        match self.gate.clone().try_lock_owned() {
            Ok(gate) => {
                *slot(&self.active) = Some(kind);
                Ok(RunGuard {
                    kind,
                    active: self.active.clone(),
                    _gate: gate,
                })
            }
            Err(_) => Err(RunLockError {
                requested: kind,
                active: slot(&self.active).unwrap_or(JobKind::Backup),
            }),
        }
    }

    pub fn active(&self) -> Option<JobKind> {
        *slot(&self.active)
    }
}

impl RunGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *slot(&self.active) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let lock = RunLock::new();
        let guard = lock.try_acquire(JobKind::Backup).unwrap();
        assert_eq!(guard.kind(), JobKind::Backup);

        let err = lock.try_acquire(JobKind::Restore).err().unwrap();
        assert_eq!(err.active, JobKind::Backup);
        assert_eq!(err.requested, JobKind::Restore);
        assert_eq!(lock.active(), Some(JobKind::Backup));

        drop(guard);
        assert_eq!(lock.active(), None);
        assert!(lock.try_acquire(JobKind::Restore).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let lock = RunLock::new();
        let other = lock.clone();
        let _guard = lock.try_acquire(JobKind::Restore).unwrap();
        let err = other.try_acquire(JobKind::Backup).err().unwrap();
        assert_eq!(err.to_string(), "cannot start backup: a restore is already in progress");
    }
}
