use std::fmt;
use std::str::FromStr;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXPOSE_AS: &str = "scheduler";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CRON: &str = "* * * * *";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_KEY_PREFIX: &str = "tickwork";

/// Top-level config (tickwork.toml + TICKWORK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickworkConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Shell-backed tasks registered by the daemon at startup.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Installer surface: lock driver, service name and node role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub lock: LockConfig,
    /// Name under which the host application registers the scheduler service.
    #[serde(default = "default_expose_as")]
    pub expose_as: String,
    /// Role label of this instance. Tasks pinned with `on_node` only run on
    /// instances whose role matches.
    #[serde(default)]
    pub node_role: Option<String>,
    /// How often the daemon invokes a tick. The scheduler core never drives
    /// itself; this is only read by the binary.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            expose_as: default_expose_as(),
            node_role: None,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub driver: LockDriver,
    /// Connection URL of the shared cache backing the `cache` driver.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            driver: LockDriver::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

/// Which lock store backs task exclusivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDriver {
    /// In-process map. Mutual exclusion within one process only.
    #[default]
    Memory,
    /// Shared cache collaborator. Mutual exclusion across the fleet.
    Cache,
}

impl fmt::Display for LockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockDriver::Memory => "memory",
            LockDriver::Cache => "cache",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LockDriver {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(LockDriver::Memory),
            "cache" => Ok(LockDriver::Cache),
            other => Err(format!("unknown lock driver: {other}")),
        }
    }
}

/// One `[[tasks]]` entry: a shell command on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub command: String,
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Lock TTL in seconds. When set the task runs on one server per window.
    #[serde(default)]
    pub on_one_server: Option<u64>,
    #[serde(default)]
    pub background: bool,
    /// Only run on instances with this node role.
    #[serde(default)]
    pub node: Option<String>,
}

fn default_expose_as() -> String {
    DEFAULT_EXPOSE_AS.to_string()
}
fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}
fn default_cron() -> String {
    DEFAULT_CRON.to_string()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl TickworkConfig {
    /// Load config from a TOML file with TICKWORK_* env var overrides.
    ///
    /// Nested keys use a double underscore so snake_case field names survive,
    /// e.g. `TICKWORK_SCHEDULER__NODE_ROLE=worker`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = Self::resolve_path(config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("TICKWORK_").split("__")),
        )
    }

    /// Config file location: the explicit path, then `TICKWORK_CONFIG`, then
    /// `~/.tickwork/tickwork.toml`. A missing file yields defaults.
    pub fn resolve_path(config_path: Option<&str>) -> String {
        config_path
            .map(String::from)
            .or_else(|| std::env::var("TICKWORK_CONFIG").ok())
            .unwrap_or_else(default_config_path)
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml(toml: &str) -> crate::error::Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        let config: TickworkConfig = figment
            .extract()
            .map_err(|e| crate::error::TickworkError::Config(e.to_string()))?;

        for task in &config.tasks {
            if task.name.trim().is_empty() {
                return Err(crate::error::TickworkError::Config(
                    "task name must not be empty".to_string(),
                ));
            }
        }
        if config.scheduler.tick_interval_secs == 0 {
            return Err(crate::error::TickworkError::Config(
                "scheduler.tick_interval_secs must be positive".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.toml", home)
}
