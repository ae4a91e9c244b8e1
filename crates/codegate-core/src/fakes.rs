//! Scripted [`ProcessRunner`] for tests.
//!
//! Programs are keyed by name. Anything not scripted behaves as if the tool
//! were not installed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{Invocation, ProcessError, ProcessOutput, ProcessRunner, ToolOutcome};

#[derive(Debug, Clone)]
enum Script {
    Output { output: ProcessOutput, delay: Duration },
    Missing,
    SpawnError(String),
}

/// Process runner that replays canned outputs.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `program` exits with `exit_code` and prints `stdout`.
    pub fn with_output(self, program: &str, exit_code: i32, stdout: &str) -> Self {
        self.with_delayed_output(program, Duration::ZERO, exit_code, stdout)
    }

    /// Like [`with_output`](Self::with_output) but takes `delay` to finish.
    /// If the delay exceeds the invocation timeout the call times out.
    pub fn with_delayed_output(
        self,
        program: &str,
        delay: Duration,
        exit_code: i32,
        stdout: &str,
    ) -> Self {
        let output = ProcessOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: delay.as_millis() as u64,
        };
        self.script(program, Script::Output { output, delay })
    }

    /// `program` is explicitly not installed.
    pub fn with_missing(self, program: &str) -> Self {
        self.script(program, Script::Missing)
    }

    /// Spawning `program` fails with an unexpected OS error.
    pub fn with_spawn_error(self, program: &str, reason: &str) -> Self {
        self.script(program, Script::SpawnError(reason.to_string()))
    }

    /// Every invocation seen so far, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of one program.
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }

    fn script(self, program: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(program.to_string(), script);
        self
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, ProcessError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&invocation.program)
            .cloned()
            .unwrap_or(Script::Missing);

        match script {
            Script::Missing => Ok(ToolOutcome::Missing {
                program: invocation.program.clone(),
            }),
            Script::SpawnError(reason) => Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason),
            }),
            Script::Output { output, delay } => {
                if delay > invocation.timeout {
                    tokio::time::sleep(invocation.timeout).await;
                    return Err(ProcessError::Timeout {
                        program: invocation.program.clone(),
                        timeout: invocation.timeout,
                    });
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(ToolOutcome::Completed(output))
            }
        }
    }
}
