//! Process runners.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
    error::{Result, TerminalError},
    output,
    types::{ExecOptions, ExecResult},
};

/// Runs a shell command to completion and reports how it ended.
///
/// A non-zero exit is NOT an error at this layer; it is reported through
/// [`ExecResult`]. Errors mean the command could not be run or observed.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ExecResult>;
}

/// Executes commands via `sh -c` with a timeout and capped output.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    options: ExecOptions,
}

impl ShellRunner {
    pub fn new(options: ExecOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<ExecResult> {
        debug!(command, "exec");

        let timeout_secs = self.options.effective_timeout_secs();

        // kill_on_drop: when the timeout fires, dropping the wait future
        // drops the Child, which kills the process.
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TerminalError::Spawn(format!("spawn failed: {e}")))?;

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
        {
            Ok(Ok(out)) => {
                let max = self.options.max_output_chars;
                Ok(ExecResult {
                    exit_code: out.status.code().unwrap_or(-1),
                    stdout: output::keep_tail(&output::clean(&out.stdout), max),
                    stderr: output::keep_tail(&output::clean(&out.stderr), max),
                    success: out.status.success(),
                })
            }
            Ok(Err(e)) => Err(TerminalError::IoError(e)),
            Err(_elapsed) => {
                warn!(command, timeout_secs, "command timed out, killed");
                Err(TerminalError::Timeout {
                    ms: timeout_secs * 1_000,
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let result = ShellRunner::default().run("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.success);
        assert!(result.is_ok());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let result = ShellRunner::default()
            .run("echo oops >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success);
        assert!(!result.is_ok());
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let runner = ShellRunner::new(ExecOptions {
            timeout_secs: 1,
            ..ExecOptions::default()
        });
        let err = runner.run("sleep 5").await.unwrap_err();
        assert!(matches!(err, TerminalError::Timeout { ms: 1_000 }));
    }

    #[tokio::test]
    async fn output_is_capped() {
        let runner = ShellRunner::new(ExecOptions {
            max_output_chars: 8,
            ..ExecOptions::default()
        });
        let result = runner.run("printf 'abcdefghijklmnop'").await.unwrap();
        assert!(result.stdout.ends_with("ijklmnop"));
        assert!(result.stdout.contains("8 chars omitted"));
    }
}
