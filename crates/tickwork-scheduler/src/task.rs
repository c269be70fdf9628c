use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use tickwork_terminal::ProcessRunner;

use crate::{
    error::{Result, SchedulerError},
    evaluator::parse_timezone,
};

/// Lock TTL applied by `on_one_server()` / `without_overlapping()`.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a task callback or observer returns.
pub type TaskResult = std::result::Result<(), BoxError>;

/// Called with the finished report. Errors and panics are logged and ignored.
pub type Observer = Arc<dyn Fn(&TaskReport) -> TaskResult + Send + Sync>;

type CallbackFn = dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync;

/// The unit of work a task performs. Cheap to clone.
#[derive(Clone)]
pub struct TaskCallback(Arc<CallbackFn>);

impl TaskCallback {
    /// Wrap an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    /// Wrap a synchronous closure. It runs when the returned future is polled.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move || {
            let f = Arc::clone(&f);
            async move { (*f)() }.boxed()
        }))
    }

    pub(crate) fn invoke(&self) -> BoxFuture<'static, TaskResult> {
        (self.0)()
    }
}

impl fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskCallback(..)")
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Handed to observers after an execution.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Set when `status` is `Failed`: the error message, or the panic message.
    pub error: Option<String>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// An immutable, registered task.
///
/// Built with [`TaskBuilder`]; the scheduler never mutates it.
#[derive(Clone)]
pub struct TaskDefinition {
    pub(crate) name: String,
    pub(crate) cron_expression: String,
    pub(crate) timezone: String,
    pub(crate) callback: TaskCallback,
    pub(crate) command: Option<String>,
    pub(crate) exclusive: bool,
    pub(crate) lock_ttl_secs: u64,
    pub(crate) background: bool,
    pub(crate) node_role: Option<String>,
    pub(crate) on_success: Vec<Observer>,
    pub(crate) on_failure: Vec<Observer>,
}

impl TaskDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cron_expression(&self) -> &str {
        &self.cron_expression
    }

    /// IANA timezone the expression is evaluated in.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// The shell command, for tasks built with [`TaskBuilder::exec`].
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Whether at most one execution per minute window runs across the fleet.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn lock_ttl_secs(&self) -> u64 {
        self.lock_ttl_secs
    }

    pub fn runs_in_background(&self) -> bool {
        self.background
    }

    /// Only nodes with this role run the task. `None` = every node.
    pub fn node_role(&self) -> Option<&str> {
        self.node_role.as_deref()
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("cron_expression", &self.cron_expression)
            .field("timezone", &self.timezone)
            .field("command", &self.command)
            .field("exclusive", &self.exclusive)
            .field("lock_ttl_secs", &self.lock_ttl_secs)
            .field("background", &self.background)
            .field("node_role", &self.node_role)
            .field("on_success", &self.on_success.len())
            .field("on_failure", &self.on_failure.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent construction of a [`TaskDefinition`].
///
/// Defaults: `* * * * *` in UTC, not exclusive, foreground, any node.
/// Argument errors are remembered and reported by [`TaskBuilder::build`],
/// the first one winning.
///
/// ```rust
/// use tickwork_scheduler::{TaskBuilder, TaskCallback};
///
/// let task = TaskBuilder::new("nightly-report", TaskCallback::from_fn(|| Ok(())))
///     .daily_at("03:30")
///     .timezone("Europe/Berlin")
///     .on_one_server()
///     .build()
///     .unwrap();
/// assert_eq!(task.cron_expression(), "30 3 * * *");
/// ```
#[must_use]
pub struct TaskBuilder {
    def: TaskDefinition,
    error: Option<SchedulerError>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, callback: TaskCallback) -> Self {
        Self {
            def: TaskDefinition {
                name: name.into(),
                cron_expression: "* * * * *".to_string(),
                timezone: "UTC".to_string(),
                callback,
                command: None,
                exclusive: false,
                lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
                background: false,
                node_role: None,
                on_success: Vec::new(),
                on_failure: Vec::new(),
            },
            error: None,
        }
    }

    /// A task that runs `command` through `runner`.
    ///
    /// The execution fails when the runner errors, or when the process does
    /// not exit successfully with code 0.
    pub fn exec(
        name: impl Into<String>,
        command: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let command = command.into();
        let cmd = command.clone();
        let callback = TaskCallback::new(move || {
            let runner = Arc::clone(&runner);
            let cmd = cmd.clone();
            async move {
                run_command(runner.as_ref(), &cmd)
                    .await
                    .map_err(BoxError::from)
            }
        });
        let mut builder = Self::new(name, callback);
        builder.def.command = Some(command);
        builder
    }

    fn fail(mut self, err: SchedulerError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    // ---- Frequencies ----

    /// Use a raw cron expression. Not validated here: an expression that
    /// cannot be parsed simply never becomes due.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.def.cron_expression = expression.into();
        self
    }

    pub fn every_minute(self) -> Self {
        self.cron("* * * * *")
    }

    pub fn every_five_minutes(self) -> Self {
        self.cron("*/5 * * * *")
    }

    pub fn every_ten_minutes(self) -> Self {
        self.cron("*/10 * * * *")
    }

    pub fn every_fifteen_minutes(self) -> Self {
        self.cron("*/15 * * * *")
    }

    pub fn every_thirty_minutes(self) -> Self {
        self.cron("0,30 * * * *")
    }

    pub fn hourly(self) -> Self {
        self.cron("0 * * * *")
    }

    /// Every hour at `minute` past.
    pub fn hourly_at(self, minute: u32) -> Self {
        if minute > 59 {
            return self.fail(SchedulerError::InvalidSchedule(format!(
                "minute {minute} outside 0-59"
            )));
        }
        self.cron(format!("{minute} * * * *"))
    }

    pub fn daily(self) -> Self {
        self.cron("0 0 * * *")
    }

    pub fn daily_at(self, time: &str) -> Self {
        self.daily().at(time)
    }

    /// Sundays at midnight.
    pub fn weekly(self) -> Self {
        self.cron("0 0 * * 0")
    }

    /// `day` is 0-7 with both 0 and 7 meaning Sunday.
    pub fn weekly_on(self, day: u32, time: &str) -> Self {
        if day > 7 {
            return self.fail(SchedulerError::InvalidSchedule(format!(
                "weekday {day} outside 0-7"
            )));
        }
        self.cron(format!("0 0 * * {day}")).at(time)
    }

    pub fn monthly(self) -> Self {
        self.cron("0 0 1 * *")
    }

    pub fn monthly_on(self, day: u32, time: &str) -> Self {
        if !(1..=31).contains(&day) {
            return self.fail(SchedulerError::InvalidSchedule(format!(
                "day of month {day} outside 1-31"
            )));
        }
        self.cron(format!("0 0 {day} * *")).at(time)
    }

    /// Replace the minute and hour fields with `time` (`HH:mm`).
    ///
    /// Only applies to 5-field expressions; anything else makes `build` fail.
    pub fn at(mut self, time: &str) -> Self {
        let Some((hour, minute)) = parse_time(time) else {
            return self.fail(SchedulerError::InvalidTime {
                value: time.to_string(),
            });
        };

        let mut fields: Vec<String> = self
            .def
            .cron_expression
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if fields.len() != 5 {
            let expr = self.def.cron_expression.clone();
            return self.fail(SchedulerError::InvalidCronExpression {
                expr,
                reason: "at() needs a 5-field expression".to_string(),
            });
        }
        fields[0] = minute.to_string();
        fields[1] = hour.to_string();
        self.def.cron_expression = fields.join(" ");
        self
    }

    // ---- Constraints ----

    /// IANA timezone the expression is evaluated in. Checked by `build`.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.def.timezone = timezone.into();
        self
    }

    /// At most one node runs each minute window, locked for the default TTL.
    pub fn on_one_server(self) -> Self {
        self.on_one_server_for(DEFAULT_LOCK_TTL_SECS)
    }

    pub fn on_one_server_for(mut self, ttl_secs: u64) -> Self {
        self.def.exclusive = true;
        self.def.lock_ttl_secs = ttl_secs;
        self
    }

    /// Same lock as [`on_one_server`](Self::on_one_server); with a
    /// process-local lock store it only guards this process.
    pub fn without_overlapping(self) -> Self {
        self.on_one_server()
    }

    pub fn without_overlapping_for(self, ttl_secs: u64) -> Self {
        self.on_one_server_for(ttl_secs)
    }

    /// Return from `run_task` immediately; the body runs detached.
    pub fn run_in_background(mut self) -> Self {
        self.def.background = true;
        self
    }

    /// Restrict to nodes configured with `role`.
    pub fn on_node(mut self, role: impl Into<String>) -> Self {
        self.def.node_role = Some(role.into());
        self
    }

    // ---- Observers ----

    pub fn on_success<F>(mut self, observer: F) -> Self
    where
        F: Fn(&TaskReport) -> TaskResult + Send + Sync + 'static,
    {
        self.def.on_success.push(Arc::new(observer));
        self
    }

    pub fn on_failure<F>(mut self, observer: F) -> Self
    where
        F: Fn(&TaskReport) -> TaskResult + Send + Sync + 'static,
    {
        self.def.on_failure.push(Arc::new(observer));
        self
    }

    /// Finish the definition.
    ///
    /// # Errors
    ///
    /// - The first argument error recorded by a builder method.
    /// - `InvalidSchedule` — empty name, or zero lock TTL on an exclusive task.
    /// - `InvalidTimezone` — the timezone is not an IANA name.
    pub fn build(self) -> Result<TaskDefinition> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.def.name.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(
                "task name must not be empty".to_string(),
            ));
        }
        if self.def.exclusive && self.def.lock_ttl_secs == 0 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "task '{}' has a zero lock TTL",
                self.def.name
            )));
        }
        parse_timezone(&self.def.timezone)?;
        Ok(self.def)
    }
}

/// `HH:mm` → (hour, minute).
fn parse_time(time: &str) -> Option<(u32, u32)> {
    let (h, m) = time.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60 && m.len() == 2).then_some((hour, minute))
}

async fn run_command(runner: &dyn ProcessRunner, command: &str) -> Result<()> {
    let result = runner.run(command).await?;
    if !result.is_ok() {
        return Err(SchedulerError::CommandFailed {
            command: command.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        });
    }
    Ok(())
}
