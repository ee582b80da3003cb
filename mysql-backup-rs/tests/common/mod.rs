#![allow(dead_code)]

use async_trait::async_trait;
use mysql_backup::services::archive;
use mysql_backup::services::command::{
    CommandOutput, CommandRunner, Invocation, RunError, StdinSource, StdoutSink,
};
use mysql_backup::AppConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;

pub const ORDERS_SQL: &str = "-- MySQL dump\nCREATE TABLE `orders` (`id` int NOT NULL);\nINSERT INTO `orders` VALUES (1),(2);\n";

/// One recorded tool invocation. Streamed stdin is read to the end.
#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl Call {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    pub fn last_arg(&self) -> &str {
        self.args.last().map(String::as_str).unwrap_or("")
    }

    pub fn stdin_text(&self) -> String {
        String::from_utf8_lossy(self.stdin.as_deref().unwrap_or_default()).into_owned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub timed_out: bool,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

type Handler = Box<dyn Fn(&Call) -> Reply + Send + Sync>;

/// Stands in for `mysqldump` and `mysql`. Every call is recorded and answered
/// by the handler; stdout goes to the file sink when one is given.
pub struct FakeRunner {
    calls: Mutex<Vec<Call>>,
    handler: Handler,
    delay: Option<Duration>,
}

impl FakeRunner {
    pub fn new(handler: impl Fn(&Call) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            delay: None,
        })
    }

    /// Like `new`, but every call takes `delay` before it answers.
    pub fn slow(delay: Duration, handler: impl Fn(&Call) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            delay: Some(delay),
        })
    }

    /// Dumps `ORDERS_SQL` for every database and accepts every client call.
    pub fn healthy() -> Arc<Self> {
        Self::new(|_| Reply::ok(ORDERS_SQL))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, RunError> {
        let Invocation {
            program,
            args,
            stdin,
            stdout,
            timeout,
        } = invocation;

        let mut stdin_error = None;
        let stdin = match stdin {
            StdinSource::Null => None,
            StdinSource::Stream(mut reader) => {
                let mut buf = Vec::new();
                if let Err(e) = reader.read_to_end(&mut buf).await {
                    stdin_error = Some(e.to_string());
                }
                Some(buf)
            }
        };

        let call = Call {
            program: program.clone(),
            args,
            stdin,
            timeout,
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = (self.handler)(&call);
        self.calls.lock().unwrap().push(call);

        if reply.timed_out {
            return Err(RunError::Timeout {
                program,
                after: timeout.unwrap_or_default(),
            });
        }

        let captured = match stdout {
            StdoutSink::File(mut file) => {
                file.write_all(&reply.stdout)?;
                String::new()
            }
            StdoutSink::Capture => String::from_utf8_lossy(&reply.stdout).into_owned(),
        };

        Ok(CommandOutput {
            exit_code: reply.exit_code,
            stdout: captured,
            stderr: reply.stderr,
            stdin_error,
        })
    }
}

/// Config rooted in `dir` with one source database per name.
pub fn test_config(dir: &Path, databases: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.source.host = "db.internal".into();
    config.source.password = "s3cret".into();
    config.backup.databases = databases.iter().map(|d| d.to_string()).collect();
    config.backup.backup_dir = dir.join("backups");
    config.backup.status_file = dir.join("backup_status.json");
    config.restore.targets_file = dir.join("restore_targets.json");
    config.log.file = Some(dir.join("backup_mysql.log"));
    config.server.run_on_startup = false;
    config
}

pub fn write_targets(config: &AppConfig) {
    let body = serde_json::json!({
        "databases": [
            {
                "name": "Staging",
                "host": "10.0.0.2",
                "port": 3306,
                "user": "restore",
                "password": "target-pw",
                "description": "staging replica"
            }
        ]
    });
    std::fs::write(&config.restore.targets_file, body.to_string()).unwrap();
}

/// Writes a compressed artifact into the backup directory.
pub async fn write_artifact(config: &AppConfig, file_name: &str, sql: &str) -> PathBuf {
    let dir = &config.backup.backup_dir;
    std::fs::create_dir_all(dir).unwrap();
    let dump_name = file_name.strip_suffix(".gz").unwrap();
    let dump = dir.join(dump_name);
    std::fs::write(&dump, sql).unwrap();
    archive::compress_dump(&dump).await.unwrap()
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
