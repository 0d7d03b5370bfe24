//! Remote Callbacks
//!
//! Contract an out-of-process worker (e.g. a build subprocess driver) uses to
//! report back to the task that owns it, and a bridge that applies those
//! reports to a live [`Task`].

use log::{error, log, Level};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::{TaskError, TaskResult};
use super::output::OutputLine;
use super::task::Task;

/// Severity of a remote event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<Severity> for Level {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error => Level::Error,
        }
    }
}

/// Reports a remote worker sends to its owning task
pub trait RemoteTaskCallback: Send + Sync {
    /// The remote side failed
    fn error(&self, message: &str);

    /// Free-form event
    fn event(&self, severity: Severity, id: &str, name: &str, message: &str);

    /// Progress changed, description kept
    fn progress(&self, percent: u32) -> TaskResult<()>;

    /// Description changed, progress kept
    fn description(&self, text: &str) -> TaskResult<()>;

    /// Pause checkpoint on behalf of the remote side.
    ///
    /// Blocks while the owning task is paused.
    fn is_paused(&self) -> TaskResult<bool>;
}

/// Applies remote reports to a task
pub struct TaskCallbackBridge {
    task: Task,
    error: Mutex<Option<TaskError>>,
}

impl TaskCallbackBridge {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            error: Mutex::new(None),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// First failure reported by the remote side, for the body to return
    pub fn take_error(&self) -> Option<TaskError> {
        self.error.lock().take()
    }
}

impl RemoteTaskCallback for TaskCallbackBridge {
    fn error(&self, message: &str) {
        error!("Remote failure in task '{}': {}", self.task.title(), message);
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(TaskError::failed(message));
        }
    }

    fn event(&self, severity: Severity, id: &str, name: &str, message: &str) {
        let level = Level::from(severity);
        log!(level, "[{}] {} ({}): {}", self.task.title(), name, id, message);
        self.task.push_output(OutputLine {
            level,
            message: format!("{}: {}", name, message),
        });
    }

    fn progress(&self, percent: u32) -> TaskResult<()> {
        self.task.set_percent(percent)
    }

    fn description(&self, text: &str) -> TaskResult<()> {
        self.task.set_description(text)
    }

    fn is_paused(&self) -> TaskResult<bool> {
        self.task.checkpoint().map(|_| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::task::{FnWork, TaskContext};
    use crate::tasks::types::TaskStatus;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_progress_and_description_keep_each_other() {
        let task = Task::from_fn("Remote build", |_ctx| Ok(()));
        let bridge = TaskCallbackBridge::new(task.clone());

        bridge.description("Compiling").unwrap();
        bridge.progress(40).unwrap();
        assert_eq!(task.progress(), 40);

        bridge.description("Linking").unwrap();
        assert_eq!(task.progress(), 40);
        assert_eq!(bridge.progress(150), Err(TaskError::InvalidProgress(150)));
    }

    #[test]
    fn test_first_error_wins() {
        let bridge = TaskCallbackBridge::new(Task::from_fn("Remote", |_ctx| Ok(())));
        bridge.error("compiler crashed");
        bridge.error("connection lost");
        assert_eq!(bridge.take_error(), Some(TaskError::failed("compiler crashed")));
        assert_eq!(bridge.take_error(), None);
    }

    #[test]
    fn test_events_are_journaled() {
        let task = Task::from_fn("Remote", |_ctx| Ok(()));
        let bridge = TaskCallbackBridge::new(task.clone());
        bridge.event(Severity::Warning, "W01", "Deprecated API", "use v2");

        let lines = task.output_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, Level::Warn);
        assert_eq!(lines[0].message, "Deprecated API: use v2");
    }

    #[test]
    fn test_is_paused_observes_cancel() {
        let (bridge_tx, bridge_rx) = mpsc::channel();
        let task = Task::new(
            "Remote pauseable",
            FnWork::new(move |ctx: &TaskContext| -> TaskResult<()> {
                let bridge = TaskCallbackBridge::new(ctx.task().clone());
                bridge_tx.send(()).ok();
                loop {
                    bridge.is_paused()?;
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .pauseable(true),
        );
        let runner = task.clone();
        let handle = thread::spawn(move || runner.run());
        bridge_rx.recv().unwrap();

        task.pause().unwrap();
        assert!(task.cancel(true));
        handle.join().unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }
}
