//! `ScriptRunner` — spawns the interpreter and supervises one execution.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use taskd_core::config::RunnerConfig;

use crate::error::{Result, RunnerError};
use crate::truncate::clip_output;
use crate::types::RunOutcome;

/// How long to wait for the child's pipes to drain after a timeout kill.
const POST_KILL_DRAIN: Duration = Duration::from_secs(2);

/// Something that can run a task payload to completion.
///
/// The scheduler only ever sees this trait, which keeps the engine testable
/// with an in-process fake and leaves the subprocess mechanics here.
#[async_trait]
pub trait PayloadRunner: Send + Sync {
    /// Run `payload` with a hard wall-clock `timeout`.
    ///
    /// Never fails: spawn errors, I/O errors, and timeouts all fold into
    /// the returned [`RunOutcome`].
    async fn run(&self, payload: &str, timeout: Duration) -> RunOutcome;
}

/// Runs payloads through an external interpreter (`python3` by default).
pub struct ScriptRunner {
    interpreter: String,
    args: Vec<String>,
    max_output_chars: usize,
}

impl ScriptRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            max_output_chars: config.max_output_chars,
        }
    }

    /// Runner for a specific interpreter binary, used heavily in tests.
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            max_output_chars: taskd_core::config::DEFAULT_MAX_OUTPUT_CHARS,
        }
    }

    async fn run_inner(&self, payload: &str, timeout: Duration) -> Result<RunOutcome> {
        // Materialize the script body. The file must outlive the child, so
        // the handle is held across the await points below.
        let mut script = NamedTempFile::new()?;
        script.write_all(payload.as_bytes())?;
        script.flush()?;

        debug!(interpreter = %self.interpreter, path = %script.path().display(), "spawning payload");

        let child = AsyncCommand::new(&self.interpreter)
            .args(&self.args)
            .arg(script.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {e}", self.interpreter)))?;

        // `wait_with_output` takes the child by value, so it runs on its own
        // task and reports back over a oneshot. The PID is captured first so
        // the timeout path can kill a child it no longer owns.
        let pid = child.id();
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                Ok(RunOutcome::Completed {
                    exit_code,
                    stdout: self.clip(&output.stdout),
                    stderr: self.clip(&output.stderr),
                })
            }

            Ok(Ok(Err(e))) => Err(RunnerError::Io(e)),

            // The oneshot sender was dropped — the wait task panicked.
            Ok(Err(_)) => Err(RunnerError::Internal(
                "wait task ended without a result".to_string(),
            )),

            Err(_elapsed) => {
                if let Some(raw_pid) = pid {
                    // SIGKILL via the raw PID: the Child handle lives on the
                    // wait task, so kill(2) is the only lever left.
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                }

                // The wait task finishes once the child dies; grab whatever
                // the payload managed to print before the kill.
                let (stdout, stderr) = match tokio::time::timeout(POST_KILL_DRAIN, &mut rx).await
                {
                    Ok(Ok(Ok(output))) => {
                        (self.clip(&output.stdout), self.clip(&output.stderr))
                    }
                    _ => (String::new(), String::new()),
                };
                Ok(RunOutcome::TimedOut { stdout, stderr })
            }
        }
    }

    fn clip(&self, raw: &[u8]) -> String {
        clip_output(&String::from_utf8_lossy(raw), self.max_output_chars)
    }
}

#[async_trait]
impl PayloadRunner for ScriptRunner {
    async fn run(&self, payload: &str, timeout: Duration) -> RunOutcome {
        match self.run_inner(payload, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("payload run failed before completion: {e}");
                RunOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
