//! Task Listeners
//!
//! Observer contract for task lifecycle and progress, plus the two-tier
//! listener set each task keeps.

use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::task::Task;
use super::types::TaskStatus;

/// Observer of a single task's lifecycle.
///
/// Callbacks run synchronously on the thread that produced the change (usually
/// the pool worker), so implementations must not block. UI layers are expected
/// to marshal onto their own event loop.
pub trait TaskListener: Send + Sync {
    /// Status moved from `prev` to `next`
    fn on_status_changed(&self, _task: &Task, _prev: TaskStatus, _next: TaskStatus) {}

    /// Progress or description changed
    fn on_progress_changed(&self, _task: &Task, _percent: u8, _description: Option<&str>) {}

    /// Worker is about to run the task body
    fn on_before_execute(&self, _task: &Task) {}

    /// Task body returned and the terminal status has been delivered
    fn on_after_execute(&self, _task: &Task) {}
}

/// Priority tier of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerTier {
    /// Executor-level listeners, always notified first
    System,
    /// Everything else, notified in registration order
    User,
}

/// Registered listeners of one task, system tier first
#[derive(Default)]
pub(crate) struct ListenerSet {
    system: Vec<Arc<dyn TaskListener>>,
    user: Vec<Arc<dyn TaskListener>>,
}

impl ListenerSet {
    pub(crate) fn add(&mut self, tier: ListenerTier, listener: Arc<dyn TaskListener>) {
        match tier {
            ListenerTier::System => self.system.push(listener),
            ListenerTier::User => self.user.push(listener),
        }
    }

    /// Remove by identity; returns whether anything was removed
    pub(crate) fn remove(&mut self, listener: &Arc<dyn TaskListener>) -> bool {
        let before = self.len();
        self.system.retain(|l| !same_listener(l, listener));
        self.user.retain(|l| !same_listener(l, listener));
        before != self.len()
    }

    pub(crate) fn clear(&mut self) {
        self.system.clear();
        self.user.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    /// Copy of the current listeners in notification order
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn TaskListener>> {
        self.system.iter().chain(self.user.iter()).cloned().collect()
    }
}

fn same_listener(a: &Arc<dyn TaskListener>, b: &Arc<dyn TaskListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Deliver one event to every listener of a snapshot, isolating panics
pub(crate) fn notify_each<F>(task: &Task, listeners: &[Arc<dyn TaskListener>], event: &str, f: F)
where
    F: Fn(&dyn TaskListener),
{
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
            error!(
                "Listener panicked on {} for task '{}': {}",
                event,
                task.title(),
                panic_message(panic.as_ref())
            );
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
