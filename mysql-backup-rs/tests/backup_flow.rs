mod common;

use chrono::{Local, TimeZone};
use common::{file_names, set_mtime, test_config, FakeRunner, Reply, ORDERS_SQL};
use mysql_backup::models::{RunOutcome, RunStatus, StatusLedger};
use mysql_backup::services::archive;
use mysql_backup::services::backup::{BackupOrchestrator, FixedClock};
use mysql_backup::services::run_lock::JobKind;
use mysql_backup::{AppState, Event, EventBus};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_partial_failure_is_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["shop_db", "broken", "empty_db", "traking"]);
    let runner = FakeRunner::new(|call| match call.last_arg() {
        "broken" => Reply::exit(2, "mysqldump: Got error: 1049: Unknown database 'broken'"),
        "empty_db" => Reply::ok(""),
        _ => Reply::ok(ORDERS_SQL),
    });
    let backups = BackupOrchestrator::new(&config, runner.clone(), EventBus::new());

    let outcome = backups.run().await;

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failed_count, 2);
    assert_eq!(outcome.total_databases, 4);
    assert_eq!(outcome.success_count + outcome.failed_count, outcome.total_databases);
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.databases, vec!["shop_db", "broken", "empty_db", "traking"]);
    assert_eq!(runner.calls().len(), 4);

    // Failed dumps leave nothing behind; successes are compressed only.
    let names = file_names(&config.backup.backup_dir);
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| n.ends_with(".sql.gz")));
    assert!(names.iter().any(|n| n.starts_with("shop_db_")));
    assert!(names.iter().any(|n| n.starts_with("traking_")));
}

#[tokio::test]
async fn test_all_successful_run_exits_zero() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["a", "b"]);
    let backups = BackupOrchestrator::new(&config, FakeRunner::healthy(), EventBus::new());

    let outcome = backups.run().await;
    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_zero_byte_dump_counts_as_failure() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["orders_db"]);
    let backups = BackupOrchestrator::new(&config, FakeRunner::new(|_| Reply::ok("")), EventBus::new());

    let outcome = backups.run().await;
    assert_eq!(outcome.success_count, 0);
    assert_eq!(outcome.failed_count, 1);
    assert_eq!(outcome.status, RunStatus::Error);
    assert!(file_names(&config.backup.backup_dir).is_empty());
}

#[tokio::test]
async fn test_dump_invocation() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["orders_db"]);
    let runner = FakeRunner::healthy();
    let backups = BackupOrchestrator::new(&config, runner.clone(), EventBus::new());
    backups.run().await;

    let calls = runner.calls();
    let dump = &calls[0];
    assert_eq!(dump.program, "mysqldump");
    for flag in [
        "--host=db.internal",
        "--port=3306",
        "--user=root",
        "--password=s3cret",
        "--skip-ssl",
        "--single-transaction",
        "--routines",
        "--triggers",
        "--events",
    ] {
        assert!(dump.has_arg(flag), "missing {flag}");
    }
    assert_eq!(dump.last_arg(), "orders_db");
    assert!(dump.timeout.is_none());
    assert!(dump.stdin.is_none());
}

#[tokio::test]
async fn test_orders_db_artifact_lifecycle() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["orders_db"]);
    let created = Local.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
    let backups = BackupOrchestrator::new(&config, FakeRunner::healthy(), EventBus::new())
        .with_clock(Arc::new(FixedClock(created)));

    let outcome = backups.run().await;
    assert!(outcome.is_success());

    let artifact = config.backup.backup_dir.join("orders_db_20240301_233000.sql.gz");
    assert_eq!(file_names(&config.backup.backup_dir), vec!["orders_db_20240301_233000.sql.gz"]);

    let mut sql = String::new();
    archive::open_decompressed(&artifact)
        .await
        .unwrap()
        .read_to_string(&mut sql)
        .await
        .unwrap();
    assert_eq!(sql, ORDERS_SQL);

    set_mtime(&artifact, created.into());

    let march_20 = Local.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
    let report = backups.cleanup_expired_at(march_20, 30).await;
    assert!(report.removed.is_empty());
    assert!(artifact.exists());

    let april_5 = Local.with_ymd_and_hms(2024, 4, 5, 12, 0, 0).unwrap();
    let report = backups.cleanup_expired_at(april_5, 30).await;
    assert_eq!(report.removed, vec![artifact.clone()]);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_cleanup_window_is_strict() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["orders_db"]);
    std::fs::create_dir_all(&config.backup.backup_dir).unwrap();
    let backups = BackupOrchestrator::new(&config, FakeRunner::healthy(), EventBus::new());

    let now = Local::now();
    let now_sys: SystemTime = now.into();
    let hour = Duration::from_secs(3600);
    let day = hour * 24;

    let fresh = config.backup.backup_dir.join("fresh_20240101_000000.sql.gz");
    let stale = config.backup.backup_dir.join("stale_20240101_000000.sql.gz");
    let stale_raw = config.backup.backup_dir.join("raw_20240101_000000.sql");
    for path in [&fresh, &stale, &stale_raw] {
        std::fs::write(path, b"x").unwrap();
    }
    set_mtime(&fresh, now_sys - (day * 29 + hour * 23));
    set_mtime(&stale, now_sys - (day * 30 + hour));
    set_mtime(&stale_raw, now_sys - (day * 30 + hour));

    let report = backups.cleanup_expired_at(now, 30).await;
    assert_eq!(report.removed.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(file_names(&config.backup.backup_dir), vec!["fresh_20240101_000000.sql.gz"]);
}

#[tokio::test]
async fn test_ledger_matches_outcome() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["a", "b"]);
    let runner = FakeRunner::new(|call| {
        if call.last_arg() == "b" {
            Reply::exit(1, "denied")
        } else {
            Reply::ok(ORDERS_SQL)
        }
    });
    let backups = BackupOrchestrator::new(&config, runner, EventBus::new());
    let outcome = backups.run().await;

    let recorded: RunOutcome = StatusLedger::new(&config.backup.status_file).read().await.unwrap();
    assert_eq!(recorded, outcome);

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&config.backup.status_file).unwrap()).unwrap();
    assert_eq!(raw["status"], "error");
    assert_eq!(raw["total_databases"], 2);
}

#[tokio::test]
async fn test_each_run_overwrites_ledger() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["a"]);
    let ledger = StatusLedger::new(&config.backup.status_file);

    let failing = BackupOrchestrator::new(&config, FakeRunner::new(|_| Reply::exit(1, "")), EventBus::new());
    failing.run().await;
    assert_eq!(ledger.read().await.unwrap().status, RunStatus::Error);

    let healthy = BackupOrchestrator::new(&config, FakeRunner::healthy(), EventBus::new());
    healthy.run().await;
    let recorded = ledger.read().await.unwrap();
    assert_eq!(recorded.status, RunStatus::Success);
    assert_eq!(recorded.failed_count, 0);
}

#[tokio::test]
async fn test_status_write_failure_is_reported_not_raised() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), &["a"]);
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    config.backup.status_file = blocker.join("backup_status.json");

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let backups = BackupOrchestrator::new(&config, FakeRunner::healthy(), events);

    let outcome = backups.run().await;
    assert!(outcome.is_success());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, Event::StatusWriteFailed { .. })));
}

#[tokio::test]
async fn test_run_emits_events_in_order() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["good", "bad"]);
    let runner = FakeRunner::new(|call| {
        if call.last_arg() == "bad" {
            Reply::exit(2, "boom")
        } else {
            Reply::ok(ORDERS_SQL)
        }
    });
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let backups = BackupOrchestrator::new(&config, runner, events);
    backups.run().await;

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
    assert!(matches!(events.last(), Some(Event::RunFinished { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DumpSucceeded { database, .. } if database == "good")));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Compressed { database, .. } if database == "good")));
    assert!(events.iter().any(
        |e| matches!(e, Event::DumpFailed { database, reason, .. } if database == "bad" && reason.contains("boom"))
    ));
}

#[tokio::test]
async fn test_backup_rejected_while_another_job_runs() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["a"]);
    let runner = FakeRunner::healthy();
    let state = Arc::new(AppState::new(config, runner.clone()));

    let guard = state.run_lock.try_acquire(JobKind::Restore).unwrap();
    let err = state.try_run_backup().await.unwrap_err();
    assert_eq!(err.active, JobKind::Restore);
    assert!(runner.calls().is_empty());

    drop(guard);
    assert!(state.try_run_backup().await.unwrap().is_success());
}

#[tokio::test]
async fn test_compression_failure_keeps_raw_dump() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &["orders_db"]);
    let created = Local.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
    // A directory where the compressed artifact should go makes the encoder fail.
    let blocked = config.backup.backup_dir.join("orders_db_20240301_233000.sql.gz");
    std::fs::create_dir_all(&blocked).unwrap();

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let backups = BackupOrchestrator::new(&config, FakeRunner::healthy(), events)
        .with_clock(Arc::new(FixedClock(created)));

    let outcome = backups.run().await;
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.failed_count, 0);
    assert_eq!(outcome.status, RunStatus::Success);

    let raw = config.backup.backup_dir.join("orders_db_20240301_233000.sql");
    assert_eq!(std::fs::read_to_string(&raw).unwrap(), ORDERS_SQL);
    assert!(blocked.is_dir());
    assert!(drain(&mut rx).iter().any(
        |e| matches!(e, Event::CompressionFailed { file, .. } if file == "orders_db_20240301_233000.sql")
    ));
}
