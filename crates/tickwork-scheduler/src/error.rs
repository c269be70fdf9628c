use thiserror::Error;

use tickwork_lock::LockError;
use tickwork_terminal::TerminalError;

/// Errors that can occur within the scheduler subsystem.
///
/// None of these escape a tick: `run` and `run_task` log and absorb them.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The expression cannot be parsed by either evaluator.
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    /// Not a known IANA timezone name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A time-of-day argument was not `HH:mm`.
    #[error("Invalid time '{value}': expected HH:mm")]
    InvalidTime { value: String },

    /// A frequency argument is out of range (minute, weekday, day of month).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A definition with this name is already registered.
    #[error("Task already registered: {name}")]
    DuplicateTask { name: String },

    #[error("Task not found: {name}")]
    TaskNotFound { name: String },

    /// A shell-backed task's process exited unsuccessfully.
    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The process runner could not run the command at all.
    #[error("Command error: {0}")]
    Terminal(#[from] TerminalError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
