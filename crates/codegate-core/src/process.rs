//! External tool execution with hard timeouts.
//!
//! Every checker reaches external tools through the [`ProcessRunner`] trait so
//! tests can substitute a scripted runner. A missing executable is reported as
//! [`ToolOutcome::Missing`] rather than an error, which forces callers to
//! decide how to degrade.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A single external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,

    /// Arguments, not including the program.
    pub args: Vec<String>,

    /// Working directory (inherits the caller's when `None`).
    pub cwd: Option<PathBuf>,

    /// Hard wall-clock limit.
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined with spaces, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, newline separated.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Whether a tool ran, or could not be found at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The tool ran to completion (any exit code).
    Completed(ProcessOutput),

    /// The executable does not exist on this host.
    Missing { program: String },
}

impl ToolOutcome {
    /// The captured output, or `None` when the tool is missing.
    pub fn completed(self) -> Option<ProcessOutput> {
        match self {
            ToolOutcome::Completed(output) => Some(output),
            ToolOutcome::Missing { .. } => None,
        }
    }
}

/// Errors from running an external tool.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect output of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty command")]
    EmptyCommand,
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// Executes external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `invocation` to completion or until its timeout elapses.
    ///
    /// On timeout the child is killed before `ProcessError::Timeout` is
    /// returned.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, ProcessError> {
        if invocation.program.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        // A missing cwd also surfaces as NotFound from spawn; keep it distinct
        // from a missing executable.
        if let Some(cwd) = &invocation.cwd {
            let is_dir = tokio::fs::metadata(cwd)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                return Err(ProcessError::Spawn {
                    program: invocation.program.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("working directory {} does not exist", cwd.display()),
                    ),
                });
            }
        }

        let start = Instant::now();
        debug!(command = %invocation.command_line(), "spawning tool");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(program = %invocation.program, "tool not installed");
                return Ok(ToolOutcome::Missing {
                    program: invocation.program.clone(),
                });
            }
            Err(e) => {
                return Err(ProcessError::Spawn {
                    program: invocation.program.clone(),
                    source: e,
                })
            }
        };

        // Dropping the wait future on timeout drops the child, and
        // kill_on_drop delivers SIGKILL.
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            })?
            .map_err(|e| ProcessError::Wait {
                program: invocation.program.clone(),
                source: e,
            })?;

        Ok(ToolOutcome::Completed(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_command_line_joins_args() {
        let inv = Invocation::new("ruff", secs(1)).args(["check", ".", "--output-format", "json"]);
        assert_eq!(inv.command_line(), "ruff check . --output-format json");
    }

    #[test]
    fn test_process_output_success() {
        let out = ProcessOutput {
            exit_code: 0,
            ..Default::default()
        };
        assert!(out.success());
        let out = ProcessOutput {
            exit_code: 2,
            ..Default::default()
        };
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let inv = Invocation::new("echo", secs(10)).arg("hello");
        let out = TokioProcessRunner
            .run(&inv)
            .await
            .expect("run failed")
            .completed()
            .expect("echo should exist");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_captures_exit_code_and_stderr() {
        let inv = Invocation::new("sh", secs(10)).args(["-c", "echo oops >&2; exit 3"]);
        let out = TokioProcessRunner.run(&inv).await.unwrap().completed().unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_an_error() {
        let inv = Invocation::new("codegate-definitely-not-installed", secs(10));
        let outcome = TokioProcessRunner.run(&inv).await.unwrap();
        assert_eq!(
            outcome,
            ToolOutcome::Missing {
                program: "codegate-definitely-not-installed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_and_returns_promptly() {
        let inv = Invocation::new("sleep", Duration::from_millis(200)).arg("30");
        let start = Instant::now();
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < secs(5));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still-running");
        let script = format!("sleep 1; touch {}", marker.display());
        let inv = Invocation::new("sh", Duration::from_millis(200)).args(["-c", script.as_str()]);

        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!marker.exists(), "child outlived its timeout");
    }

    #[tokio::test]
    async fn test_file_as_cwd_is_spawn_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let inv = Invocation::new("echo", secs(10)).current_dir(file.path());
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_cwd_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let inv = Invocation::new("ls", secs(10)).current_dir(dir.path());
        let out = TokioProcessRunner.run(&inv).await.unwrap().completed().unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_missing_cwd_is_spawn_error() {
        let inv = Invocation::new("echo", secs(10)).current_dir("/nonexistent/codegate/dir");
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
