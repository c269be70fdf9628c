//! `tickwork-core` — configuration and shared error types for the Tickwork
//! scheduler workspace.

pub mod config;
pub mod error;

pub use config::{LockConfig, LockDriver, SchedulerConfig, TaskConfig, TickworkConfig};
pub use error::{Result, TickworkError};
