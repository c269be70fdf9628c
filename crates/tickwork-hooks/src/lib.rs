//! `tickwork-hooks` — observer bus for scheduler lifecycle events.
//!
//! The scheduler receives an `Arc<dyn HookSink>` at construction and calls
//! [`HookSink::notify`] at every lifecycle point. [`HookEngine`] is the
//! in-process sink: a registry of named handlers filtered by event.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::HookEngine;
pub use error::{HookError, Result};
pub use types::{HookContext, HookDefinition, HookEvent, HookHandler, HookSink};
