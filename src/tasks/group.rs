//! Group Tasks
//!
//! Sequential composite: runs a fixed list of sub-tasks one at a time through
//! the executor and reports an aggregated progress on itself.

use log::{debug, error, warn};
use std::sync::Arc;

use super::error::{TaskError, TaskResult};
use super::executor::TaskExecutorService;
use super::listener::TaskListener;
use super::task::{Task, TaskContext, WeakTask, Work};
use super::types::TaskStatus;

/// Mean progress of a group's children.
///
/// Finished children count as 100 whatever they last reported; with
/// `stop_on_error` unset failed children count as 100 too. An empty group
/// reads 0.
pub fn aggregate_progress(children: &[(TaskStatus, u8)], stop_on_error: bool) -> u8 {
    if children.is_empty() {
        return 0;
    }
    let total: u32 = children
        .iter()
        .map(|(status, progress)| match status {
            TaskStatus::Finished => 100,
            TaskStatus::Failed if !stop_on_error => 100,
            _ => u32::from(*progress),
        })
        .sum();
    (total / children.len() as u32) as u8
}

/// Work of a sequential group
pub struct GroupTask {
    executor: TaskExecutorService,
    tasks: Vec<Task>,
    stop_on_error: bool,
}

impl GroupTask {
    /// Build a group task over `tasks`.
    ///
    /// With `stop_on_error` the first failing sub-task fails the group and the
    /// remaining ones are cancelled; otherwise failures are logged and the
    /// group moves on.
    pub fn new(
        executor: &TaskExecutorService,
        title: impl Into<String>,
        stop_on_error: bool,
        tasks: Vec<Task>,
    ) -> Task {
        let group = Task::new(
            title,
            GroupTask {
                executor: executor.clone(),
                tasks: tasks.clone(),
                stop_on_error,
            },
        );

        let aggregator: Arc<dyn TaskListener> = Arc::new(ProgressAggregator {
            group: group.downgrade(),
            children: tasks.iter().map(Task::downgrade).collect(),
            stop_on_error,
        });
        for sub in &tasks {
            if let Err(e) = sub.add_listener(aggregator.clone()) {
                warn!(
                    "Group '{}' cannot follow subtask '{}': {}",
                    group.title(),
                    sub.title(),
                    e
                );
            }
        }
        group
    }

    /// Group that stops at the first failing sub-task
    pub fn sequential(
        executor: &TaskExecutorService,
        title: impl Into<String>,
        tasks: Vec<Task>,
    ) -> Task {
        Self::new(executor, title, true, tasks)
    }

    fn run_sequence(&self, ctx: &TaskContext) -> TaskResult<()> {
        for sub in &self.tasks {
            // Pausing the group holds it here, before the next sub-task starts
            ctx.checkpoint()?;
            if sub.status() == TaskStatus::Cancelled {
                debug!("Group '{}': subtask '{}' was cancelled", ctx.title(), sub.title());
                return Err(TaskError::Cancelled);
            }

            self.executor.quiet_task(sub).map_err(|e| match e {
                TaskError::AlreadyFinal(TaskStatus::Cancelled) => TaskError::Cancelled,
                e => e,
            })?;
            let outcome = sub.wait();
            report_progress(ctx.task(), &self.tasks, sub, self.stop_on_error);
            match outcome {
                Ok(()) => {}
                Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
                Err(e) if self.stop_on_error => {
                    error!(
                        "Group '{}': subtask '{}' failed: {}",
                        ctx.title(),
                        sub.title(),
                        e
                    );
                    return Err(TaskError::SubtaskFailed {
                        subtask: sub.title().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Group '{}': subtask '{}' failed, continuing: {}",
                        ctx.title(),
                        sub.title(),
                        e
                    );
                }
            }
        }
        Ok(())
    }

    fn cancel_remaining(&self) {
        for sub in &self.tasks {
            if !sub.status().is_final() && sub.cancel(true) {
                debug!("Cancelled pending subtask '{}'", sub.title());
            }
        }
    }
}

impl Work for GroupTask {
    type Output = Vec<Task>;

    fn execute(&self, ctx: &TaskContext) -> TaskResult<Vec<Task>> {
        let result = self.run_sequence(ctx);
        self.cancel_remaining();
        result.map(|_| self.tasks.clone())
    }

    fn is_pauseable(&self) -> bool {
        self.tasks.iter().any(Task::is_pauseable)
    }

    fn on_cancel(&self) {
        self.cancel_remaining();
    }
}

/// Push the aggregated progress of `children` onto the group
fn report_progress(group: &Task, children: &[Task], current: &Task, stop_on_error: bool) {
    let states: Vec<(TaskStatus, u8)> = children
        .iter()
        .map(|child| (child.status(), child.progress()))
        .collect();
    let done = states.iter().filter(|(status, _)| status.is_final()).count();
    let percent = aggregate_progress(&states, stop_on_error);
    let description = format!("{}/{}: {}", done, states.len(), current.title());

    match group.set_progress(u32::from(percent), description) {
        Ok(()) | Err(TaskError::AlreadyFinal(_)) => {}
        Err(e) => warn!("Failed to update group '{}' progress: {}", group.title(), e),
    }
}

/// Recomputes the group's progress whenever a child reports
struct ProgressAggregator {
    group: WeakTask,
    children: Vec<WeakTask>,
    stop_on_error: bool,
}

impl ProgressAggregator {
    fn refresh(&self, current: &Task) {
        let Some(group) = self.group.upgrade() else {
            return;
        };
        let children: Vec<Task> = self.children.iter().filter_map(WeakTask::upgrade).collect();
        report_progress(&group, &children, current, self.stop_on_error);
    }
}

impl TaskListener for ProgressAggregator {
    fn on_status_changed(&self, task: &Task, _prev: TaskStatus, _next: TaskStatus) {
        self.refresh(task);
    }

    fn on_progress_changed(&self, task: &Task, _percent: u8, _description: Option<&str>) {
        self.refresh(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::tasks::task::FnWork;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn executor() -> TaskExecutorService {
        TaskExecutorService::new(ExecutorConfig::default()).unwrap()
    }

    fn ok(title: &str, runs: &Arc<AtomicUsize>) -> Task {
        let runs = runs.clone();
        Task::from_fn(title, move |ctx| {
            ctx.set_progress(50, "working")?;
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(title: &str) -> Task {
        Task::from_fn(title, |_ctx| -> TaskResult<()> { Err(TaskError::failed("broken")) })
    }

    #[test]
    fn test_aggregate_progress() {
        use TaskStatus::*;
        assert_eq!(aggregate_progress(&[], true), 0);
        assert_eq!(
            aggregate_progress(&[(Started, 100), (Started, 50), (Pending, 0)], true),
            50
        );
        assert_eq!(
            aggregate_progress(&[(Finished, 100), (Finished, 50), (Pending, 0)], true),
            66
        );
        assert_eq!(aggregate_progress(&[(Failed, 20), (Finished, 0)], true), 60);
        assert_eq!(aggregate_progress(&[(Failed, 20), (Finished, 0)], false), 100);
    }

    #[test]
    fn test_stop_on_error() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = ok("A", &runs);
        let b = failing("B");
        let c = ok("C", &runs);
        let group = GroupTask::sequential(&executor, "Build", vec![a.clone(), b.clone(), c.clone()]);

        executor.execute_task(&group).unwrap();
        let result = group.wait_timeout(Duration::from_secs(5));

        assert_eq!(
            result,
            Err(TaskError::SubtaskFailed {
                subtask: "B".to_string(),
                message: "broken".to_string(),
            })
        );
        assert_eq!(group.status(), TaskStatus::Failed);
        assert_eq!(a.status(), TaskStatus::Finished);
        assert_eq!(b.status(), TaskStatus::Failed);
        assert_eq!(c.status(), TaskStatus::Cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(group.description(), "Failed: Subtask 'B' failed: broken");
    }

    #[test]
    fn test_continue_on_error() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = ok("A", &runs);
        let b = failing("B");
        let c = ok("C", &runs);
        let group = GroupTask::new(&executor, "Lenient", false, vec![a.clone(), b.clone(), c.clone()]);

        executor.execute_task(&group).unwrap();
        assert_eq!(group.wait_timeout(Duration::from_secs(5)), Ok(()));

        assert_eq!(group.status(), TaskStatus::Finished);
        assert_eq!(a.status(), TaskStatus::Finished);
        assert_eq!(b.status(), TaskStatus::Failed);
        assert_eq!(c.status(), TaskStatus::Finished);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(group.progress(), 100);

        let subs = group.take_output::<Vec<Task>>().unwrap();
        assert_eq!(subs, vec![a, b, c]);
    }

    #[test]
    fn test_empty_group_finishes() {
        let executor = executor();
        let group = GroupTask::sequential(&executor, "Nothing", Vec::new());
        assert!(!group.is_pauseable());

        executor.execute_task(&group).unwrap();
        assert_eq!(group.wait_timeout(Duration::from_secs(5)), Ok(()));
        assert_eq!(group.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_pauseable_if_any_child_is() {
        let executor = executor();
        let plain = Task::from_fn("plain", |_ctx| Ok(()));
        let pauseable = Task::new("pauseable", FnWork::new(|_ctx: &TaskContext| -> TaskResult<()> { Ok(()) }).pauseable(true));
        let group = GroupTask::sequential(&executor, "Mixed", vec![plain, pauseable]);
        assert!(group.is_pauseable());
    }

    #[test]
    fn test_progress_description_names_current_child() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        struct Seen(Arc<Mutex<Vec<(u8, Option<String>)>>>);
        impl TaskListener for Seen {
            fn on_progress_changed(&self, _task: &Task, percent: u8, description: Option<&str>) {
                self.0.lock().push((percent, description.map(str::to_string)));
            }
        }

        let group = GroupTask::sequential(
            &executor,
            "Two steps",
            vec![ok("first", &runs), ok("second", &runs)],
        );
        group.add_listener(Arc::new(Seen(seen.clone()))).unwrap();
        executor.execute_task(&group).unwrap();
        group.wait_timeout(Duration::from_secs(5)).unwrap();

        let seen = seen.lock();
        assert!(seen.contains(&(25, Some("0/2: first".to_string()))));
        assert!(seen.contains(&(50, Some("1/2: first".to_string()))));
        assert!(seen.contains(&(100, Some("2/2: second".to_string()))));
    }

    #[test]
    fn test_cancel_pending_group_cancels_children() {
        let executor = executor();
        let child = Task::from_fn("child", |_ctx| Ok(()));
        let group = GroupTask::sequential(&executor, "Never started", vec![child.clone()]);

        assert!(group.cancel(false));
        assert_eq!(group.status(), TaskStatus::Cancelled);
        assert_eq!(child.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancelled_child_cancels_group() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let child = Task::from_fn("child", |_ctx| Ok(()));
        let after = ok("after", &runs);
        let group = GroupTask::new(&executor, "Lenient", false, vec![child.clone(), after.clone()]);

        assert!(child.cancel(false));
        executor.execute_task(&group).unwrap();

        assert_eq!(group.wait_timeout(Duration::from_secs(5)), Err(TaskError::Cancelled));
        assert_eq!(group.status(), TaskStatus::Cancelled);
        assert_eq!(after.status(), TaskStatus::Cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_group_cancels_children() {
        let executor = executor();
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let first = Task::from_fn("blocking", move |ctx| -> TaskResult<()> {
            started_tx.lock().send(()).ok();
            loop {
                ctx.checkpoint()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let second = Task::from_fn("never", |_ctx| Ok(()));
        let group = GroupTask::sequential(&executor, "Cancelled", vec![first.clone(), second.clone()]);

        executor.execute_task(&group).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(group.cancel(true));

        assert_eq!(group.wait_timeout(Duration::from_secs(5)), Err(TaskError::Cancelled));
        assert_eq!(first.wait_timeout(Duration::from_secs(5)), Err(TaskError::Cancelled));
        assert_eq!(second.status(), TaskStatus::Cancelled);
    }
}
