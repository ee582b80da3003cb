use anyhow::Context;
use clap::{Parser, Subcommand};
use mysql_backup::services::command::ProcessRunner;
use mysql_backup::services::restore::RestoreRequest;
use mysql_backup::services::scheduler::BackupScheduler;
use mysql_backup::{routes, utils, AppConfig, AppState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true, env = "MYSQL_BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the dashboard API and run backups on the configured schedule
    Serve,

    /// Back up every configured database once and exit
    Backup,

    /// Remove artifacts older than the retention window and exit
    Cleanup,

    /// Restore an artifact onto a target from the registry
    Restore {
        /// Artifact file name inside the backup directory
        #[arg(long)]
        file: String,

        /// Index of the target in the registry file
        #[arg(long, allow_negative_numbers = true)]
        target: i64,

        /// Destination database; dropped and recreated
        #[arg(long)]
        database: String,

        /// Confirm the destination database may be dropped
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    let state = Arc::new(AppState::new(config, Arc::new(ProcessRunner)));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Backup => {
            let outcome = state.try_run_backup().await?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
        Command::Cleanup => {
            let report = state
                .backups
                .cleanup_expired(state.config.backup.retention_days)
                .await;
            tracing::info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Cleanup finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore {
            file,
            target,
            database,
            yes,
        } => {
            let request = RestoreRequest {
                filename: file,
                target_index: target,
                database_name: database,
            };
            if !yes {
                let plan = state.restores.prepare(&request).await?;
                anyhow::bail!(
                    "Refusing to drop `{}` on {} ({}) without --yes",
                    plan.database(),
                    plan.target().name,
                    plan.target().connection.address()
                );
            }
            let report = state.try_restore(&request).await?;
            tracing::info!(
                file = %report.filename,
                database = %report.database,
                "Restored onto {}",
                report.target
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<ExitCode> {
    let config = &state.config;
    tracing::info!(
        "Starting mysql-backup v{} on port {}",
        env!("CARGO_PKG_VERSION"),
        config.server.port
    );
    tracing::info!(
        databases = %config.backup.databases.join(","),
        source = %config.source.address(),
        retention_days = config.backup.retention_days,
        "Backup configuration"
    );

    state
        .archive
        .ensure_exists()
        .await
        .with_context(|| format!("Failed to create {}", state.archive.root().display()))?;

    // Initialize cron scheduler
    let scheduler = match BackupScheduler::new(state.clone()).await {
        Ok(s) => {
            match s.schedule_backups(&config.server.schedule).await {
                Ok(job) => {
                    if let Ok(Some(next)) = s.next_run(job).await {
                        tracing::info!("Next scheduled backup at {}", next.format("%d/%m/%Y %H:%M"));
                    }
                }
                Err(e) => tracing::warn!("Failed to schedule backups: {}", e),
            }
            if let Err(e) = s.start().await {
                tracing::warn!("Failed to start scheduler: {}", e);
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            None
        }
    };

    if config.server.run_on_startup {
        let startup = state.clone();
        tokio::spawn(async move {
            tracing::info!("Running startup backup");
            if let Err(e) = startup.try_run_backup().await {
                tracing::warn!(error = %e, "Skipping startup backup");
            }
        });
    }

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    tracing::info!("Server stopped");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
