//! External tool invocation.
//!
//! Orchestrators describe what to run as an [`Invocation`] and hand it to a
//! [`CommandRunner`]. Production uses [`ProcessRunner`]; tests substitute a
//! fake that never touches a real database client.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

pub enum StdinSource {
    Null,
    Stream(BoxedReader),
}

pub enum StdoutSink {
    Capture,
    File(std::fs::File),
}

pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdinSource,
    pub stdout: StdoutSink,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinSource::Null,
            stdout: StdoutSink::Capture,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_stream(mut self, reader: BoxedReader) -> Self {
        self.stdin = StdinSource::Stream(reader);
        self
    }

    pub fn stdout_to_file(mut self, file: std::fs::File) -> Self {
        self.stdout = StdoutSink::File(file);
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Command line safe for logs.
    pub fn redacted(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.starts_with("--password=") {
                line.push_str("--password=****");
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.redacted())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Failure while feeding stdin (read error on the source, broken pipe).
    pub stdin_error: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("I/O error while running command: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, RunError>;
}

/// Runs tools as tokio child processes. A child still running when its
/// timeout fires is killed.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, RunError> {
        let Invocation {
            program,
            args,
            stdin,
            stdout,
            timeout,
        } = invocation;

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args).stderr(Stdio::piped()).kill_on_drop(true);

        match stdout {
            StdoutSink::Capture => cmd.stdout(Stdio::piped()),
            StdoutSink::File(file) => cmd.stdout(Stdio::from(file)),
        };

        let source = match stdin {
            StdinSource::Null => {
                cmd.stdin(Stdio::null());
                None
            }
            StdinSource::Stream(reader) => {
                cmd.stdin(Stdio::piped());
                Some(reader)
            }
        };

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

        let feeder = match (source, child.stdin.take()) {
            (Some(mut reader), Some(mut pipe)) => Some(tokio::spawn(async move {
                let copied = tokio::io::copy(&mut reader, &mut pipe).await;
                drop(pipe);
                copied
            })),
            _ => None,
        };

        let waiting = child.wait_with_output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(result) => result?,
                Err(_) => {
                    if let Some(feeder) = &feeder {
                        feeder.abort();
                    }
                    return Err(RunError::Timeout {
                        program,
                        after: limit,
                    });
                }
            },
            None => waiting.await?,
        };

        let stdin_error = match feeder {
            Some(handle) => match handle.await {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            },
            None => None,
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            stdin_error,
        })
    }
}
