//! Configuration for the backup service.
//!
//! Loaded from a TOML file, then overridden by `MYSQL_BACKUP_*` environment
//! variables (a `.env` file is honoured).

use crate::models::MySqlConnection;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "mysql-backup.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server the databases are dumped from
    pub source: MySqlConnection,
    pub backup: BackupSection,
    pub restore: RestoreSection,
    pub server: ServerSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Databases dumped on every run, in order
    pub databases: Vec<String>,

    /// Artifacts older than this many days are removed after each run
    pub retention_days: u32,

    /// Archive directory holding `<db>_<date>_<time>.sql.gz` files
    pub backup_dir: PathBuf,

    /// JSON record of the most recent run
    pub status_file: PathBuf,

    /// Dump tool executable
    pub dump_program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreSection {
    /// JSON list of restore destinations
    pub targets_file: PathBuf,

    /// MySQL client executable
    pub client_program: String,

    pub reset_timeout_secs: u64,
    pub replay_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// HTTP listen port
    pub port: u16,

    /// Six-field cron expression (with seconds), evaluated in local time
    pub schedule: String,

    /// Run a full backup as soon as `serve` starts
    pub run_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file served by the logs endpoint; `None` logs to stdout only
    pub file: Option<PathBuf>,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            retention_days: 30,
            backup_dir: PathBuf::from("backups"),
            status_file: PathBuf::from("backup_status.json"),
            dump_program: "mysqldump".to_string(),
        }
    }
}

impl Default for RestoreSection {
    fn default() -> Self {
        Self {
            targets_file: PathBuf::from("restore_targets.json"),
            client_program: "mysql".to_string(),
            reset_timeout_secs: 30,
            replay_timeout_secs: 600,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 5000,
            schedule: "0 30 23 * * *".to_string(),
            run_on_startup: true,
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("backup_mysql.log")),
        }
    }
}

impl RestoreSection {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// File (if present), then `.env`, then process environment; validated.
    ///
    /// An explicitly requested file must exist. The default file is optional so
    /// a container can be configured purely through the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MYSQL_BACKUP_HOST") {
            self.source.host = v;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_PORT") {
            self.source.port = v
                .parse()
                .with_context(|| format!("MYSQL_BACKUP_PORT is not a port: {v}"))?;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_USER") {
            self.source.user = v;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_PASSWORD") {
            self.source.password = v;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_DATABASES") {
            self.backup.databases = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MYSQL_BACKUP_RETENTION_DAYS") {
            self.backup.retention_days = v
                .parse()
                .with_context(|| format!("MYSQL_BACKUP_RETENTION_DAYS is not a number: {v}"))?;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MYSQL_BACKUP_TARGETS_FILE") {
            self.restore.targets_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("MYSQL_BACKUP_LISTEN_PORT") {
            self.server.port = v
                .parse()
                .with_context(|| format!("MYSQL_BACKUP_LISTEN_PORT is not a port: {v}"))?;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_SCHEDULE") {
            self.server.schedule = v;
        }
        if let Some(v) = lookup("MYSQL_BACKUP_LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backup.databases.is_empty() {
            anyhow::bail!("backup.databases must list at least one database");
        }
        if let Some(empty) = self.backup.databases.iter().position(|d| d.trim().is_empty()) {
            anyhow::bail!("backup.databases[{empty}] is empty");
        }
        if self.backup.retention_days == 0 {
            anyhow::bail!("backup.retention_days must be greater than zero");
        }
        if self.backup.backup_dir.as_os_str().is_empty() {
            anyhow::bail!("backup.backup_dir cannot be empty");
        }
        Ok(())
    }
}
