//! Narrow subprocess capability.
//!
//! External audio tools (yt-dlp, ffmpeg, ffprobe, the separator and
//! recognizer CLIs) are all driven through one primitive: run this command
//! with this timeout and collect stdout, stderr, and the exit code. The
//! timeout is propagated by killing the child.

use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A command to execute with a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from subprocess execution.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("'{program}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("IO error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a command, capturing output, enforcing the timeout by killing the
/// child. A non-zero exit is returned as `Ok(CommandOutput)`; callers that
/// require success use [`run_checked`].
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
    let start = Instant::now();

    debug!(
        program = %spec.program,
        args = ?spec.args,
        timeout_secs = spec.timeout.as_secs(),
        "spawning subprocess"
    );

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

    let waited = tokio::time::timeout(spec.timeout, child.wait_with_output()).await;

    match waited {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let result = CommandOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration: start.elapsed(),
            };
            debug!(
                program = %spec.program,
                exit_code,
                duration_ms = result.duration.as_millis() as u64,
                "subprocess finished"
            );
            Ok(result)
        }
        Ok(Err(source)) => Err(ProcessError::Io {
            program: spec.program.clone(),
            source,
        }),
        Err(_elapsed) => Err(ProcessError::Timeout {
            program: spec.program.clone(),
            timeout: spec.timeout,
        }),
    }
}

/// Run a command and fail on non-zero exit, carrying stderr in the error.
pub async fn run_checked(spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
    let output = run(spec).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ProcessError::NonZeroExit {
            program: spec.program.clone(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
