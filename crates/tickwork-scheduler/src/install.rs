//! Wiring a [`SchedulerManager`] from configuration.

use std::sync::Arc;

use tracing::info;

use tickwork_core::config::{SchedulerConfig, TaskConfig};
use tickwork_hooks::HookSink;
use tickwork_lock::{LockManager, SharedCache};
use tickwork_terminal::ProcessRunner;

use crate::{error::Result, manager::SchedulerManager, task::TaskBuilder};

/// A ready scheduler and the service name the host registers it under.
#[derive(Debug, Clone)]
pub struct Installed {
    pub service_name: String,
    pub scheduler: SchedulerManager,
}

/// Build the lock manager for the configured driver and a scheduler on top.
///
/// # Errors
///
/// - `Lock(MissingCache)` — driver `cache` without a `cache` collaborator.
pub fn install(
    config: &SchedulerConfig,
    cache: Option<Arc<dyn SharedCache>>,
    hooks: Arc<dyn HookSink>,
    runner: Arc<dyn ProcessRunner>,
) -> Result<Installed> {
    let locks = LockManager::from_driver(config.lock.driver, cache)?;
    let mut scheduler = SchedulerManager::new(locks, hooks).with_runner(runner);
    if let Some(role) = &config.node_role {
        scheduler = scheduler.with_node_role(role.clone());
    }

    info!(
        service = %config.expose_as,
        driver = %config.lock.driver,
        node_role = ?config.node_role,
        "scheduler installed"
    );
    Ok(Installed {
        service_name: config.expose_as.clone(),
        scheduler,
    })
}

/// Builder for a configured shell task.
pub fn task_from_config(scheduler: &SchedulerManager, task: &TaskConfig) -> TaskBuilder {
    let mut builder = scheduler
        .exec(&task.name, &task.command)
        .cron(&task.cron)
        .timezone(&task.timezone);
    if let Some(ttl) = task.on_one_server {
        builder = builder.on_one_server_for(ttl);
    }
    if task.background {
        builder = builder.run_in_background();
    }
    if let Some(node) = &task.node {
        builder = builder.on_node(node);
    }
    builder
}

/// Register every configured task. Stops at the first invalid one.
pub fn register_configured(scheduler: &SchedulerManager, tasks: &[TaskConfig]) -> Result<usize> {
    for task in tasks {
        scheduler.schedule(task_from_config(scheduler, task))?;
    }
    Ok(tasks.len())
}
