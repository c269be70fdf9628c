use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tickwork_hooks::{HookEvent, HookSink};
use tickwork_lock::LockManager;
use tickwork_terminal::{ProcessRunner, ShellRunner};

use crate::{
    error::{Result, SchedulerError},
    evaluator::CronEvaluator,
    task::{Observer, TaskBuilder, TaskCallback, TaskDefinition, TaskReport, TaskStatus},
};

/// Lock key for one task in one minute window: `task:<name>:<YYYYMMDDHHmm>`.
///
/// The window is taken from `now` in UTC regardless of the task's timezone, so
/// every node computes the same key for the same tick.
pub fn lock_key(name: &str, now: DateTime<Utc>) -> String {
    format!("task:{}:{}", name, now.format("%Y%m%d%H%M"))
}

/// What `run` dispatched.
#[derive(Debug)]
pub struct RunSummary {
    pub date: DateTime<Utc>,
    /// Names of the due tasks, in registration order.
    pub due: Vec<String>,
    dispatched: Vec<JoinHandle<()>>,
}

impl RunSummary {
    pub fn due_count(&self) -> usize {
        self.due.len()
    }

    /// Wait for every dispatched `run_task` to return.
    ///
    /// Background bodies are detached from their dispatch and are not waited for.
    pub async fn finished(self) {
        for handle in self.dispatched {
            let _ = handle.await;
        }
    }
}

/// How `run_task` resolved.
#[derive(Debug, Clone)]
pub enum TaskRun {
    /// This node's role does not match the task's.
    NodeMismatch,
    /// Another execution already holds this minute window.
    LockHeld,
    /// Ran in the foreground.
    Finished(TaskReport),
    /// Handed to a detached execution.
    Detached,
}

/// Orchestrates registered tasks: due-checks, filtering, locking, hooks.
///
/// Cheap to clone; clones share the registry, lock manager and hook sink.
#[derive(Clone)]
pub struct SchedulerManager {
    tasks: Arc<RwLock<Vec<Arc<TaskDefinition>>>>,
    locks: LockManager,
    hooks: Arc<dyn HookSink>,
    runner: Arc<dyn ProcessRunner>,
    node_role: Option<String>,
}

impl SchedulerManager {
    /// A manager with no node role and a [`ShellRunner`] for `exec` tasks.
    pub fn new(locks: LockManager, hooks: Arc<dyn HookSink>) -> Self {
        Self {
            tasks: Arc::default(),
            locks,
            hooks,
            runner: Arc::new(ShellRunner::default()),
            node_role: None,
        }
    }

    pub fn with_node_role(mut self, role: impl Into<String>) -> Self {
        self.node_role = Some(role.into());
        self
    }

    /// Runner handed to tasks created by [`exec`](Self::exec).
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn node_role(&self) -> Option<&str> {
        self.node_role.as_deref()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // ---- Registration ----

    /// Start a builder for a callback task. Register it with [`schedule`](Self::schedule).
    pub fn task(&self, name: impl Into<String>, callback: TaskCallback) -> TaskBuilder {
        TaskBuilder::new(name, callback)
    }

    /// Start a builder for a shell task run through this manager's runner.
    pub fn exec(&self, name: impl Into<String>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::exec(name, command, Arc::clone(&self.runner))
    }

    /// Build and register.
    pub fn schedule(&self, builder: TaskBuilder) -> Result<()> {
        self.register(builder.build()?)
    }

    /// Add a definition to the registry.
    ///
    /// An expression that cannot be parsed is accepted but logged: it will
    /// never become due.
    ///
    /// # Errors
    ///
    /// - `DuplicateTask` — a definition with the same name is registered.
    pub fn register(&self, def: TaskDefinition) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if tasks.iter().any(|t| t.name == def.name) {
            return Err(SchedulerError::DuplicateTask { name: def.name });
        }

        if let Err(e) = CronEvaluator::next_date(&def.cron_expression, &def.timezone, Utc::now()) {
            warn!(task = %def.name, error = %e, "task registered with a schedule that never fires");
        }
        info!(
            task = %def.name,
            cron = %def.cron_expression,
            timezone = %def.timezone,
            exclusive = def.exclusive,
            background = def.background,
            node_role = ?def.node_role,
            "task registered"
        );
        tasks.push(Arc::new(def));
        Ok(())
    }

    /// Registered definitions in registration order.
    pub fn tasks(&self) -> Vec<Arc<TaskDefinition>> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Next occurrence of a registered task strictly after `after`.
    pub fn next_due(&self, name: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let def = self.get(name).ok_or_else(|| SchedulerError::TaskNotFound {
            name: name.to_string(),
        })?;
        CronEvaluator::next_date(&def.cron_expression, &def.timezone, after)
    }

    // ---- Execution ----

    /// One scheduling tick.
    ///
    /// Every due task is handed to its own detached `run_task`; this returns
    /// once they are dispatched, not once they finish. Failures in those
    /// executions are logged and never reach the caller.
    pub async fn run(&self, now: DateTime<Utc>) -> RunSummary {
        let date = now.to_rfc3339();
        self.emit(HookEvent::RunStart, json!({ "date": date }));

        let due: Vec<Arc<TaskDefinition>> = self
            .tasks()
            .into_iter()
            .filter(|t| CronEvaluator::is_due(&t.cron_expression, &t.timezone, now))
            .collect();

        let mut dispatched = Vec::with_capacity(due.len());
        for def in &due {
            let manager = self.clone();
            let def = Arc::clone(def);
            dispatched.push(spawn_supervised(def.name.clone(), async move {
                if let Err(e) = manager.run_task(&def, now).await {
                    error!(task = %def.name, error = %e, "task dispatch failed");
                }
            }));
        }

        let names: Vec<String> = due.iter().map(|t| t.name.clone()).collect();
        debug!(date = %date, due = names.len(), "tick dispatched");
        self.emit(
            HookEvent::RunComplete,
            json!({ "date": date, "dueCount": names.len() }),
        );

        RunSummary {
            date: now,
            due: names,
            dispatched,
        }
    }

    /// Apply node filtering and exclusivity, then execute.
    ///
    /// The exclusivity lock is never released here; it expires with its TTL,
    /// so a window cannot be re-entered even by a later tick in the same
    /// minute.
    ///
    /// # Errors
    ///
    /// - `Lock` — the lock backend failed. The task is skipped.
    pub async fn run_task(&self, def: &TaskDefinition, now: DateTime<Utc>) -> Result<TaskRun> {
        if let Some(required) = def.node_role.as_deref() {
            if self.node_role.as_deref() != Some(required) {
                debug!(
                    task = %def.name,
                    required,
                    node_role = ?self.node_role,
                    "skipping task for another node role"
                );
                return Ok(TaskRun::NodeMismatch);
            }
        }

        if def.exclusive {
            let key = lock_key(&def.name, now);
            if !self.locks.acquire(&key, def.lock_ttl_secs).await? {
                debug!(task = %def.name, lock_key = %key, "window already claimed");
                return Ok(TaskRun::LockHeld);
            }
        }

        if def.background {
            let manager = self.clone();
            let detached = def.clone();
            let _ = spawn_supervised(def.name.clone(), async move {
                manager.execute_task(&detached).await;
            });
            return Ok(TaskRun::Detached);
        }

        Ok(TaskRun::Finished(self.execute_task(def).await))
    }

    /// Run the callback with hooks and observers.
    ///
    /// Never fails: an error or panic in the callback becomes a `Failed`
    /// report, and observer errors or panics are logged and swallowed.
    pub async fn execute_task(&self, def: &TaskDefinition) -> TaskReport {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        info!(task = %def.name, "task started");
        self.emit(
            HookEvent::TaskStart,
            json!({ "name": def.name, "startTime": started_at.to_rfc3339() }),
        );

        // A callback may panic while building its future as well as while polling it.
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| def.callback.invoke())) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };
        let duration = clock.elapsed();
        let duration_ms = duration.as_millis() as u64;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("task panicked: {}", panic_message(&*payload))),
        };

        let report = TaskReport {
            name: def.name.clone(),
            status: if error.is_none() {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            },
            started_at,
            duration,
            error,
        };

        match report.error.as_deref() {
            None => {
                info!(task = %def.name, duration_ms, "task succeeded");
                self.emit(
                    HookEvent::TaskSuccess,
                    json!({ "name": def.name, "duration": duration_ms }),
                );
                notify_observers(&def.on_success, &report);
            }
            Some(err) => {
                error!(task = %def.name, duration_ms, error = %err, "task failed");
                self.emit(
                    HookEvent::TaskFailure,
                    json!({ "name": def.name, "error": err, "duration": duration_ms }),
                );
                notify_observers(&def.on_failure, &report);
            }
        }

        report
    }

    fn emit(&self, event: HookEvent, payload: Value) {
        let hooks = &self.hooks;
        if panic::catch_unwind(AssertUnwindSafe(|| hooks.notify(event, payload))).is_err() {
            warn!(event = %event, "hook sink panicked");
        }
    }
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("tasks", &self.tasks().len())
            .field("locks", &self.locks)
            .field("node_role", &self.node_role)
            .finish()
    }
}

fn notify_observers(observers: &[Observer], report: &TaskReport) {
    for (index, observer) in observers.iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(|| observer(report))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(task = %report.name, observer = index, error = %e, "observer failed")
            }
            Err(payload) => warn!(
                task = %report.name,
                observer = index,
                panic = %panic_message(&*payload),
                "observer panicked"
            ),
        }
    }
}

/// Detach `fut`, logging a panic instead of losing it with the join handle.
fn spawn_supervised<F>(task: String, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
            error!(task = %task, panic = %panic_message(&*payload), "detached execution panicked");
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::task::TaskResult;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(HookEvent, Value)>>);

    impl HookSink for Recorder {
        fn notify(&self, event: HookEvent, payload: Value) {
            self.0.lock().unwrap().push((event, payload));
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<HookEvent> {
            self.0.lock().unwrap().iter().map(|(e, _)| *e).collect()
        }
    }

    fn manager() -> (SchedulerManager, Arc<Recorder>) {
        let hooks = Arc::new(Recorder::default());
        (SchedulerManager::new(LockManager::memory(), hooks.clone()), hooks)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> TaskCallback {
        let counter = counter.clone();
        TaskCallback::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn lock_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 9, 7, 59).unwrap();
        assert_eq!(lock_key("backup", now), "task:backup:202401050907");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (m, _) = manager();
        m.schedule(m.task("a", TaskCallback::from_fn(|| Ok(())))).unwrap();
        let err = m
            .schedule(m.task("a", TaskCallback::from_fn(|| Ok(()))))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask { ref name } if name == "a"));
        assert_eq!(m.tasks().len(), 1);
    }

    #[test]
    fn registry_lookup_and_next_due() {
        let (m, _) = manager();
        m.schedule(m.task("hourly", TaskCallback::from_fn(|| Ok(()))).hourly())
            .unwrap();
        assert!(m.get("hourly").is_some());
        assert!(m.get("missing").is_none());

        let next = m.next_due("hourly", noon()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap());
        assert!(matches!(
            m.next_due("missing", noon()),
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn unparseable_expression_is_still_registered() {
        let (m, _) = manager();
        m.schedule(m.task("broken", TaskCallback::from_fn(|| Ok(()))).cron("nope"))
            .unwrap();
        assert!(m.get("broken").is_some());
    }

    #[tokio::test]
    async fn foreground_success_emits_start_then_success() {
        let (m, hooks) = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let def = m.task("t", counting(&counter)).build().unwrap();

        let outcome = m.run_task(&def, noon()).await.unwrap();
        let TaskRun::Finished(report) = outcome else {
            panic!("expected a foreground run");
        };
        assert!(report.succeeded());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.events(), vec![HookEvent::TaskStart, HookEvent::TaskSuccess]);
    }

    #[tokio::test]
    async fn panicking_callback_is_a_failure() {
        let (m, hooks) = manager();
        let def = m
            .task("boom", TaskCallback::from_fn(|| panic!("kaboom")))
            .build()
            .unwrap();

        let report = m.execute_task(&def).await;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.error.unwrap().contains("kaboom"));
        assert_eq!(hooks.events(), vec![HookEvent::TaskStart, HookEvent::TaskFailure]);
    }

    #[tokio::test]
    async fn panic_before_the_future_is_built_is_a_failure() {
        let (m, hooks) = manager();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        let def = m
            .task(
                "eager",
                TaskCallback::new(|| -> std::future::Ready<TaskResult> { panic!("prelude") }),
            )
            .on_failure(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        let report = m.execute_task(&def).await;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.error.unwrap().contains("prelude"));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.events(), vec![HookEvent::TaskStart, HookEvent::TaskFailure]);
    }

    #[tokio::test]
    async fn run_dispatches_are_joinable() {
        let (m, _) = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        m.schedule(m.task("t", counting(&counter))).unwrap();

        let summary = m.run(noon()).await;
        assert_eq!(summary.due_count(), 1);
        summary.finished().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observer_panic_does_not_stop_the_next_observer() {
        let (m, _) = manager();
        let reached = Arc::new(AtomicUsize::new(0));
        let seen = reached.clone();
        let def = m
            .task("t", TaskCallback::from_fn(|| Ok(())))
            .on_success(|_| panic!("observer bug"))
            .on_success(|_| Err("observer error".into()))
            .on_success(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        let report = m.execute_task(&def).await;
        assert!(report.succeeded());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_hook_sink_is_contained() {
        struct Exploding;
        impl HookSink for Exploding {
            fn notify(&self, _: HookEvent, _: Value) {
                panic!("sink down");
            }
        }

        let m = SchedulerManager::new(LockManager::memory(), Arc::new(Exploding));
        let counter = Arc::new(AtomicUsize::new(0));
        let def = m.task("t", counting(&counter)).build().unwrap();
        let report = m.execute_task(&def).await;
        assert!(report.succeeded());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn task_payloads_carry_name_and_duration() {
        let (m, hooks) = manager();
        let def = m
            .task("t", TaskCallback::from_fn(|| Err("nope".into())))
            .build()
            .unwrap();
        m.execute_task(&def).await;

        let recorded = hooks.0.lock().unwrap();
        let (_, start) = &recorded[0];
        assert_eq!(start["name"], "t");
        assert!(start["startTime"].is_string());
        let (_, failure) = &recorded[1];
        assert_eq!(failure["error"], "nope");
        assert!(failure["duration"].is_u64());
    }
}
