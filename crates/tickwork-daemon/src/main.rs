mod signal;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Timelike, Utc};
use clap::Parser;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tickwork_core::{LockConfig, LockDriver, TickworkConfig};
use tickwork_hooks::{HookContext, HookDefinition, HookEngine, HookEvent};
use tickwork_lock::{InMemoryCache, SharedCache};
use tickwork_scheduler::{install, register_configured, SchedulerManager};
use tickwork_terminal::ShellRunner;

#[derive(Parser, Debug)]
#[command(name = "tickwork", version, about = "Cron task runner for a fleet of nodes")]
struct Cli {
    /// Config file (default: ~/.tickwork/tickwork.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Evaluate a single tick at the current minute, wait for it, and exit
    #[arg(long)]
    once: bool,

    /// Print registered tasks with their next due instant and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwork=info,tickwork_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let path = TickworkConfig::resolve_path(cli.config.as_deref());
    if !std::path::Path::new(&path).exists() {
        warn!(path = %path, "config file not found, using defaults");
    }
    let config = TickworkConfig::load(Some(&path)).context("loading config")?;

    let cache = shared_cache(&config.scheduler.lock).await?;
    let installed = install(
        &config.scheduler,
        cache,
        Arc::new(logging_hooks()),
        Arc::new(ShellRunner::default()),
    )?;
    let scheduler = installed.scheduler;
    let registered = register_configured(&scheduler, &config.tasks)?;
    info!(
        service = %installed.service_name,
        tasks = registered,
        "tickwork ready"
    );

    if cli.list {
        print_tasks(&scheduler, Utc::now());
        return Ok(());
    }

    if cli.once {
        let summary = scheduler.run(Utc::now()).await;
        info!(due = summary.due_count(), "single tick dispatched");
        summary.finished().await;
        return Ok(());
    }

    tick_loop(scheduler, config.scheduler.tick_interval_secs).await;
    info!("tickwork stopped");
    Ok(())
}

/// Cache collaborator for the `cache` lock driver.
#[cfg(feature = "redis")]
async fn shared_cache(lock: &LockConfig) -> anyhow::Result<Option<Arc<dyn SharedCache>>> {
    if lock.driver != LockDriver::Cache {
        return Ok(None);
    }
    match &lock.redis_url {
        Some(url) => {
            let cache = tickwork_lock::RedisCache::connect(url, lock.key_prefix.clone())
                .await
                .context("connecting to the shared cache")?;
            Ok(Some(Arc::new(cache)))
        }
        None => Ok(Some(local_cache())),
    }
}

#[cfg(not(feature = "redis"))]
async fn shared_cache(lock: &LockConfig) -> anyhow::Result<Option<Arc<dyn SharedCache>>> {
    if lock.driver != LockDriver::Cache {
        return Ok(None);
    }
    if lock.redis_url.is_some() {
        anyhow::bail!("lock.redis_url is set but tickwork was built without the `redis` feature");
    }
    Ok(Some(local_cache()))
}

fn local_cache() -> Arc<dyn SharedCache> {
    warn!("cache lock driver without a shared cache URL; exclusivity covers this process only");
    Arc::new(InMemoryCache::new())
}

/// Hook engine that mirrors every scheduler event into the log.
fn logging_hooks() -> HookEngine {
    let engine = HookEngine::new();
    for event in [
        HookEvent::RunStart,
        HookEvent::RunComplete,
        HookEvent::TaskStart,
        HookEvent::TaskSuccess,
        HookEvent::TaskFailure,
    ] {
        let handler = |ctx: &HookContext| -> tickwork_hooks::Result<()> {
            debug!(event = %ctx.event, payload = %ctx.payload, "hook");
            Ok(())
        };
        engine.register(HookDefinition::new(
            format!("log:{event}"),
            event,
            Arc::new(handler),
        ));
    }
    engine
}

fn print_tasks(scheduler: &SchedulerManager, now: DateTime<Utc>) {
    for task in scheduler.tasks() {
        let next = scheduler
            .next_due(task.name(), now)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|e| format!("never ({e})"));
        println!(
            "{:<24} {:<16} {:<16} next: {}  {}",
            task.name(),
            task.cron_expression(),
            task.timezone(),
            next,
            task.command().unwrap_or_default()
        );
    }
}

/// Invoke `run` every `interval_secs`, starting on the next minute boundary.
async fn tick_loop(scheduler: SchedulerManager, interval_secs: u64) {
    let delay = delay_to_next_minute(Utc::now());
    info!(
        first_tick_in_ms = delay.as_millis() as u64,
        interval_secs,
        "tick loop started"
    );

    let mut ticker =
        tokio::time::interval_at(Instant::now() + delay, Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = signal::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = scheduler.run(Utc::now()).await;
                debug!(due = summary.due_count(), "tick");
            }
            _ = &mut shutdown => break,
        }
    }
}

fn delay_to_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute =
        u64::from(now.second()) * 1_000 + u64::from(now.timestamp_subsec_millis().min(999));
    Duration::from_millis(60_000 - into_minute.min(59_999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from(["tickwork", "--config", "/etc/tickwork.toml", "--once"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/tickwork.toml"));
        assert!(cli.once);
        assert!(!cli.list);
    }

    #[test]
    fn aligns_to_the_next_minute() {
        let at = |s| Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, s).unwrap();
        assert_eq!(delay_to_next_minute(at(0)), Duration::from_secs(60));
        assert_eq!(delay_to_next_minute(at(45)), Duration::from_secs(15));
        assert_eq!(delay_to_next_minute(at(59)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn memory_driver_needs_no_cache() {
        assert!(shared_cache(&LockConfig::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_driver_without_url_uses_a_local_cache() {
        let lock = LockConfig {
            driver: LockDriver::Cache,
            ..LockConfig::default()
        };
        assert!(shared_cache(&lock).await.unwrap().is_some());
    }

    #[test]
    fn every_event_is_logged() {
        assert_eq!(logging_hooks().len(), 5);
    }
}
