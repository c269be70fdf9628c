//! Shared data types for tickwork-terminal.

use serde::{Deserialize, Serialize};

/// Outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured standard output (ANSI escapes already stripped).
    pub stdout: String,

    /// Captured standard error (ANSI escapes already stripped).
    pub stderr: String,

    /// Whether the process reported success.
    pub success: bool,
}

impl ExecResult {
    /// True only when the process both reported success and exited with 0.
    pub fn is_ok(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Configuration knobs for command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Timeout in seconds. The child is killed if it runs longer.
    ///
    /// Clamped to [`ExecOptions::MAX_TIMEOUT_SECS`].
    pub timeout_secs: u64,

    /// Maximum characters kept per stream; older output is dropped first.
    pub max_output_chars: usize,
}

impl ExecOptions {
    /// Hard ceiling for `timeout_secs` (one day).
    pub const MAX_TIMEOUT_SECS: u64 = 86_400;

    pub(crate) fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(1, Self::MAX_TIMEOUT_SECS)
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 3_600,
            max_output_chars: 30_000,
        }
    }
}
