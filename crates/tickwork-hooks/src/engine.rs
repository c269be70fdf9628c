use std::panic::{self, AssertUnwindSafe};
use std::sync::RwLock;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::HookError;
use crate::types::{HookContext, HookDefinition, HookEvent, HookSink};

/// Central registry and dispatcher for scheduler hooks.
///
/// A single engine is shared by the whole process (pass as `Arc<HookEngine>`).
/// Handler failures, including panics, are logged and dropped so one
/// misbehaving observer never suppresses the others.
pub struct HookEngine {
    /// Sorted by priority ascending after every registration.
    hooks: RwLock<Vec<HookDefinition>>,
}

impl HookEngine {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook. Re-sorts the list so priority order is always correct.
    pub fn register(&self, hook: HookDefinition) {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        debug!(name = %hook.name, event = %hook.event, "hook registered");
        hooks.push(hook);
        // Stable sort preserves registration order within the same priority.
        hooks.sort_by_key(|h| h.priority);
    }

    /// Remove a hook by name. Silent no-op if the name is not found.
    pub fn unregister(&self, name: &str) {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let before = hooks.len();
        hooks.retain(|h| h.name != name);
        if hooks.len() < before {
            debug!(name, "hook unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every handler registered for `ctx.event`, in priority order.
    ///
    /// Returns how many handlers completed without error.
    pub fn emit(&self, ctx: &HookContext) -> usize {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        let mut ok = 0;

        for hook in hooks.iter().filter(|h| h.event == ctx.event) {
            let t = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook.handler.handle(ctx)))
                .unwrap_or_else(|payload| Err(HookError::Panicked(panic_message(&*payload))));
            let elapsed_ms = t.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    ok += 1;
                    debug!(hook = %hook.name, duration_ms = elapsed_ms, "hook completed");
                }
                Err(e) => {
                    warn!(hook = %hook.name, event = %ctx.event, error = %e, "hook failed");
                }
            }
        }

        ok
    }
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HookSink for HookEngine {
    fn notify(&self, event: HookEvent, payload: serde_json::Value) {
        self.emit(&HookContext::new(event, payload));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn HookHandler> {
        Arc::new(move |_ctx: &HookContext| -> crate::Result<()> {
            log.lock().unwrap().push(tag.to_string());
            Ok(())
        })
    }

    #[test]
    fn wire_names() {
        assert_eq!(HookEvent::RunStart.as_str(), "scheduler:run:start");
        assert_eq!(HookEvent::RunComplete.to_string(), "scheduler:run:complete");
        assert_eq!(
            serde_json::to_string(&HookEvent::TaskFailure).unwrap(),
            r#""scheduler:task:failure""#
        );
    }

    #[test]
    fn handlers_run_in_priority_order() {
        let engine = HookEngine::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.register(
            HookDefinition::new("late", HookEvent::TaskStart, recorder(log.clone(), "late"))
                .with_priority(10),
        );
        engine.register(HookDefinition::new(
            "first",
            HookEvent::TaskStart,
            recorder(log.clone(), "first"),
        ));
        engine.register(HookDefinition::new(
            "second",
            HookEvent::TaskStart,
            recorder(log.clone(), "second"),
        ));

        let ok = engine.emit(&HookContext::new(HookEvent::TaskStart, serde_json::json!({})));
        assert_eq!(ok, 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "late"]);
    }

    #[test]
    fn only_matching_event_fires() {
        let engine = HookEngine::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        engine.register(HookDefinition::new(
            "count",
            HookEvent::TaskSuccess,
            Arc::new(move |_ctx: &HookContext| -> crate::Result<()> {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));

        engine.notify(HookEvent::TaskFailure, serde_json::json!({"name": "x"}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        engine.notify(HookEvent::TaskSuccess, serde_json::json!({"name": "x"}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_stop_siblings() {
        let engine = HookEngine::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.register(HookDefinition::new(
            "errs",
            HookEvent::RunStart,
            Arc::new(|_ctx: &HookContext| -> crate::Result<()> {
                Err(HookError::ExecutionFailed("boom".into()))
            }),
        ));
        engine.register(HookDefinition::new(
            "panics",
            HookEvent::RunStart,
            Arc::new(|_ctx: &HookContext| -> crate::Result<()> { panic!("observer bug") }),
        ));
        engine.register(HookDefinition::new(
            "survivor",
            HookEvent::RunStart,
            recorder(log.clone(), "survivor"),
        ));

        let ok = engine.emit(&HookContext::new(HookEvent::RunStart, serde_json::json!({})));
        assert_eq!(ok, 1);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn unregister_removes_by_name() {
        let engine = HookEngine::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.register(HookDefinition::new("a", HookEvent::RunStart, recorder(log.clone(), "a")));
        assert_eq!(engine.len(), 1);
        engine.unregister("missing");
        assert_eq!(engine.len(), 1);
        engine.unregister("a");
        assert!(engine.is_empty());
    }
}
