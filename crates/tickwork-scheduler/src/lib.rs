//! `tickwork-scheduler` — cron task orchestration for a fleet of nodes.
//!
//! # Overview
//!
//! Tasks are registered once with a [`TaskBuilder`]. Something outside the
//! scheduler (the daemon's interval loop, or a host application) calls
//! [`SchedulerManager::run`] once per minute with the current instant. Each
//! due task is then dispatched concurrently through
//! [`SchedulerManager::run_task`]:
//!
//! 1. skip if the task is pinned to another node role;
//! 2. for exclusive tasks, claim `task:<name>:<YYYYMMDDHHmm>` in the lock
//!    store or skip;
//! 3. execute in the foreground, or detach for background tasks.
//!
//! Every lifecycle point is reported to the injected hook sink. Nothing a
//! task does can make a tick fail.
//!
//! # Frequencies
//!
//! | Helper                   | Expression      |
//! |--------------------------|-----------------|
//! | `every_minute`           | `* * * * *`     |
//! | `every_five_minutes`     | `*/5 * * * *`   |
//! | `hourly`                 | `0 * * * *`     |
//! | `daily_at("03:30")`      | `30 3 * * *`    |
//! | `weekly_on(1, "08:00")`  | `0 8 * * 1`     |
//! | `monthly_on(15, "12:00")`| `0 12 15 * *`   |

pub mod evaluator;
pub mod error;
pub mod install;
pub mod manager;
pub mod task;

pub use evaluator::CronEvaluator;
pub use error::{Result, SchedulerError};
pub use install::{install, register_configured, task_from_config, Installed};
pub use manager::{lock_key, RunSummary, SchedulerManager, TaskRun};
pub use task::{
    BoxError, Observer, TaskBuilder, TaskCallback, TaskDefinition, TaskReport, TaskResult,
    TaskStatus, DEFAULT_LOCK_TTL_SECS,
};
