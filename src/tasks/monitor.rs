//! Task Monitors
//!
//! Monitors present a collection of live tasks to an observer. The executor
//! registers every non-quiet submission with the monitor of its pool before
//! the task starts.

use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::listener::TaskListener;
use super::task::Task;
use super::types::{TaskId, TaskInfo, TaskStatus};

/// A listener that tracks and presents a set of tasks
pub trait TaskMonitor: TaskListener {
    /// Start tracking a task; called before the task is handed to a pool
    fn register_task(&self, task: &Task);

    /// Stop tracking a task
    fn unregister_task(&self, task: &Task);

    /// Forget every tracked task
    fn clear_registry(&self);
}

/// Monitor that ignores everything, used when none is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl TaskListener for NoopMonitor {}

impl TaskMonitor for NoopMonitor {
    fn register_task(&self, _task: &Task) {}
    fn unregister_task(&self, _task: &Task) {}
    fn clear_registry(&self) {}
}

/// Monitor event for broadcasts
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Task registered
    Registered(TaskInfo),
    /// Task status changed
    StatusChanged {
        id: TaskId,
        title: String,
        prev: TaskStatus,
        next: TaskStatus,
    },
    /// Task progress or description changed
    ProgressChanged {
        id: TaskId,
        percent: u8,
        description: Option<String>,
    },
    /// Task removed from the registry
    Unregistered { id: TaskId },
    /// Registry emptied
    Cleared,
}

/// Aggregate view of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub total: usize,
    /// Not yet final
    pub running: usize,
    /// Cancelled
    pub stopped: usize,
    pub failed: usize,
    /// Mean progress, final tasks counted as 100
    pub progress: u8,
}

/// Default in-process monitor
pub struct TaskRegistry {
    /// Registered tasks (id -> task)
    tasks: DashMap<TaskId, Task>,
    /// Registration order
    order: Mutex<Vec<TaskId>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with a custom event buffer size
    pub fn with_capacity(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            tasks: DashMap::new(),
            order: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    /// Subscribe to monitor events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshots of registered tasks in registration order
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.info()))
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|t| t.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn summary(&self) -> MonitorSummary {
        let states: Vec<(TaskStatus, u8)> = self
            .tasks
            .iter()
            .map(|t| (t.status(), t.progress()))
            .collect();

        let mut summary = MonitorSummary {
            total: states.len(),
            running: 0,
            stopped: 0,
            failed: 0,
            progress: 0,
        };
        let mut progress_sum: u32 = 0;
        for (status, progress) in &states {
            match status {
                TaskStatus::Cancelled => summary.stopped += 1,
                TaskStatus::Failed => summary.failed += 1,
                s if !s.is_final() => summary.running += 1,
                _ => {}
            }
            progress_sum += if status.is_final() { 100 } else { u32::from(*progress) };
        }
        if !states.is_empty() {
            summary.progress = (progress_sum / states.len() as u32) as u8;
        }
        summary
    }

    fn remove(&self, id: TaskId) -> Option<Task> {
        let removed = self.tasks.remove(&id).map(|(_, task)| task);
        if removed.is_some() {
            self.order.lock().retain(|known| *known != id);
        }
        removed
    }

    /// Prune after `task` moved to `next`.
    ///
    /// With nothing running, everything goes if nothing failed, otherwise only
    /// finished tasks go. A task cancelled while others still run is dropped
    /// on its own.
    fn prune(&self, task: &Task, next: TaskStatus) {
        let summary = self.summary();
        if summary.total == 0 {
            return;
        }
        if summary.running == 0 {
            if summary.failed == 0 {
                debug!("All {} monitored tasks stopped, clearing registry", summary.total);
                self.clear_registry();
            } else {
                let finished: Vec<Task> = self
                    .tasks
                    .iter()
                    .filter(|t| t.status() == TaskStatus::Finished)
                    .map(|t| t.value().clone())
                    .collect();
                for done in &finished {
                    self.unregister_task(done);
                }
            }
        } else if next == TaskStatus::Cancelled {
            self.unregister_task(task);
        }
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskListener for TaskRegistry {
    fn on_status_changed(&self, task: &Task, prev: TaskStatus, next: TaskStatus) {
        if !self.contains(task.id()) {
            return;
        }
        self.publish(MonitorEvent::StatusChanged {
            id: task.id(),
            title: task.title().to_string(),
            prev,
            next,
        });
        if next.is_final() {
            self.prune(task, next);
        }
    }

    fn on_progress_changed(&self, task: &Task, percent: u8, description: Option<&str>) {
        if !self.contains(task.id()) {
            return;
        }
        self.publish(MonitorEvent::ProgressChanged {
            id: task.id(),
            percent,
            description: description.map(str::to_string),
        });
    }
}

impl TaskMonitor for TaskRegistry {
    fn register_task(&self, task: &Task) {
        if self.tasks.insert(task.id(), task.clone()).is_none() {
            self.order.lock().push(task.id());
        }
        debug!("Registered task: {} ({})", task.title(), task.id());
        self.publish(MonitorEvent::Registered(task.info()));
    }

    fn unregister_task(&self, task: &Task) {
        if self.remove(task.id()).is_some() {
            debug!("Unregistered task: {} ({})", task.title(), task.id());
            self.publish(MonitorEvent::Unregistered { id: task.id() });
        }
    }

    fn clear_registry(&self) {
        let ids: Vec<TaskId> = std::mem::take(&mut *self.order.lock());
        let mut cancelled = 0;
        for id in ids {
            if let Some(task) = self.tasks.remove(&id).map(|(_, task)| task) {
                if !task.status().is_final() && task.cancel(true) {
                    cancelled += 1;
                }
            }
        }
        self.tasks.clear();
        if cancelled > 0 {
            info!("Cancelled {} unfinished tasks while clearing registry", cancelled);
        }
        self.publish(MonitorEvent::Cleared);
    }
}

/// Shared monitor handle
pub type SharedMonitor = Arc<dyn TaskMonitor>;

/// Listener view of a shared monitor
pub(crate) struct MonitorListener(pub(crate) SharedMonitor);

impl TaskListener for MonitorListener {
    fn on_status_changed(&self, task: &Task, prev: TaskStatus, next: TaskStatus) {
        self.0.on_status_changed(task, prev, next);
    }

    fn on_progress_changed(&self, task: &Task, percent: u8, description: Option<&str>) {
        self.0.on_progress_changed(task, percent, description);
    }

    fn on_before_execute(&self, task: &Task) {
        self.0.on_before_execute(task);
    }

    fn on_after_execute(&self, task: &Task) {
        self.0.on_after_execute(task);
    }
}
