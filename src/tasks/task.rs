//! Task
//!
//! Cancellable, pausable, progress-reporting unit of work and the state
//! machine that drives it on a pool worker.
//!
//! A [`Task`] is a shared handle: the executor, monitors, listeners and the
//! caller all hold clones of the same task. The user supplied [`Work`] runs on
//! exactly one worker thread, reports through a [`TaskContext`], and honors
//! pause and cancel requests at its checkpoints.

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::error::{TaskError, TaskResult};
use super::listener::{notify_each, panic_message, ListenerSet, ListenerTier, TaskListener};
use super::output::OutputLine;
use super::types::{TaskId, TaskInfo, TaskStatus};

/// The body of a task.
///
/// `execute` runs on a pool worker thread. Long running bodies should call
/// [`TaskContext::checkpoint`] at safe points so pause and cancel requests are
/// observed.
pub trait Work: Send + Sync + 'static {
    /// Value produced by a successful run
    type Output: Send + 'static;

    /// Do the work
    fn execute(&self, ctx: &TaskContext) -> TaskResult<Self::Output>;

    /// Called on the worker after the task reached FINISHED
    fn finished(&self, _output: &Self::Output) {}

    /// Whether pause/resume is supported
    fn is_pauseable(&self) -> bool {
        false
    }

    /// Called once after a cancellation request was accepted
    fn on_cancel(&self) {}
}

/// Object-safe view of a [`Work`]
trait ErasedWork: Send + Sync {
    fn execute_erased(&self, ctx: &TaskContext) -> TaskResult<Box<dyn Any + Send>>;
    fn finished_erased(&self, output: &(dyn Any + Send));
    fn on_cancel_erased(&self);
}

impl<W: Work> ErasedWork for W {
    fn execute_erased(&self, ctx: &TaskContext) -> TaskResult<Box<dyn Any + Send>> {
        self.execute(ctx).map(|output| Box::new(output) as Box<dyn Any + Send>)
    }

    fn finished_erased(&self, output: &(dyn Any + Send)) {
        if let Some(output) = output.downcast_ref::<W::Output>() {
            self.finished(output);
        }
    }

    fn on_cancel_erased(&self) {
        self.on_cancel();
    }
}

/// [`Work`] backed by a closure
pub struct FnWork<F> {
    f: F,
    pauseable: bool,
}

impl<F> FnWork<F> {
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f, pauseable: false }
    }

    /// Declare the closure pauseable
    pub fn pauseable(mut self, pauseable: bool) -> Self {
        self.pauseable = pauseable;
        self
    }
}

impl<F, T> Work for FnWork<F>
where
    F: Fn(&TaskContext) -> TaskResult<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn execute(&self, ctx: &TaskContext) -> TaskResult<T> {
        (self.f)(ctx)
    }

    fn is_pauseable(&self) -> bool {
        self.pauseable
    }
}

/// Binary gate the worker blocks on while the task is paused
struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn close(&self) {
        *self.paused.lock() = true;
    }

    fn open(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    fn wait_open(&self, cancelled: &AtomicBool) {
        let mut paused = self.paused.lock();
        while *paused && !cancelled.load(Ordering::SeqCst) {
            self.resumed.wait(&mut paused);
        }
    }
}

/// Mutable lifecycle state, guarded by one lock
#[derive(Default)]
struct TaskState {
    status: TaskStatus,
    progress: u8,
    description: Option<String>,
    failure: Option<TaskError>,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    stopped_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    finished_wall: Option<DateTime<Utc>>,
}

impl TaskState {
    fn duration(&self) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        let end = if self.status.is_final() {
            self.stopped_at
        } else if self.status == TaskStatus::Paused {
            self.paused_at
        } else {
            None
        };
        end.unwrap_or_else(Instant::now).saturating_duration_since(start)
    }

    fn outcome(&self) -> TaskResult<()> {
        match self.status {
            TaskStatus::Finished => Ok(()),
            TaskStatus::Cancelled => Err(TaskError::Cancelled),
            _ => Err(self
                .failure
                .clone()
                .unwrap_or_else(|| TaskError::failed("Task failed"))),
        }
    }
}

struct TaskInner {
    id: TaskId,
    title: String,
    created_at: DateTime<Utc>,
    pauseable: bool,
    state: Mutex<TaskState>,
    state_changed: Condvar,
    /// Serializes transitions and their notifications; re-entrant so a
    /// listener may call back into the same task
    notify_lock: ReentrantMutex<()>,
    listeners: Mutex<ListenerSet>,
    work: Mutex<Option<Arc<dyn ErasedWork>>>,
    output: Mutex<Option<Box<dyn Any + Send>>>,
    journal: Mutex<Vec<OutputLine>>,
    gate: PauseGate,
    cancel_requested: AtomicBool,
    submitted: AtomicBool,
    status_tx: watch::Sender<TaskStatus>,
}

/// Shared handle to a task
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

/// Non-owning handle, used by listeners that must not keep a task alive
#[derive(Clone)]
pub(crate) struct WeakTask(Weak<TaskInner>);

impl WeakTask {
    pub(crate) fn upgrade(&self) -> Option<Task> {
        self.0.upgrade().map(|inner| Task { inner })
    }
}

impl Task {
    /// Create a task from a [`Work`] implementation
    pub fn new<W: Work>(title: impl Into<String>, work: W) -> Self {
        let pauseable = work.is_pauseable();
        let work: Arc<dyn ErasedWork> = Arc::new(work);
        let (status_tx, _) = watch::channel(TaskStatus::Pending);

        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                title: title.into(),
                created_at: Utc::now(),
                pauseable,
                state: Mutex::new(TaskState::default()),
                state_changed: Condvar::new(),
                notify_lock: ReentrantMutex::new(()),
                listeners: Mutex::new(ListenerSet::default()),
                work: Mutex::new(Some(work)),
                output: Mutex::new(None),
                journal: Mutex::new(Vec::new()),
                gate: PauseGate::new(),
                cancel_requested: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                status_tx,
            }),
        }
    }

    /// Create a non-pauseable task from a closure
    pub fn from_fn<F, T>(title: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        Self::new(title, FnWork::new(f))
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.lock().status
    }

    pub fn progress(&self) -> u8 {
        self.inner.state.lock().progress
    }

    pub fn is_pauseable(&self) -> bool {
        self.inner.pauseable
    }

    /// Description to display: the reported text while running or after a
    /// failure, the status description otherwise
    pub fn description(&self) -> String {
        let state = self.inner.state.lock();
        match (state.status, &state.description) {
            (TaskStatus::Started, Some(text)) | (TaskStatus::Failed, Some(text)) => text.clone(),
            (status, _) => status.description().to_string(),
        }
    }

    /// Failure recorded when the task ended FAILED
    pub fn error(&self) -> Option<TaskError> {
        self.inner.state.lock().failure.clone()
    }

    /// Elapsed time since first start, excluding paused intervals
    pub fn duration(&self) -> Duration {
        self.inner.state.lock().duration()
    }

    /// Whether a cancellation request has been accepted
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Take the value produced by a successful run
    pub fn take_output<T: 'static>(&self) -> Option<T> {
        let mut slot = self.inner.output.lock();
        if slot.as_ref().map(|o| o.is::<T>()).unwrap_or(false) {
            slot.take()
                .and_then(|o| o.downcast::<T>().ok())
                .map(|boxed| *boxed)
        } else {
            None
        }
    }

    /// Register a listener notified after system listeners
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) -> TaskResult<()> {
        self.add_listener_tier(ListenerTier::User, listener)
    }

    /// Register an executor-level listener, notified before all user listeners
    pub fn add_system_listener(&self, listener: Arc<dyn TaskListener>) -> TaskResult<()> {
        self.add_listener_tier(ListenerTier::System, listener)
    }

    fn add_listener_tier(&self, tier: ListenerTier, listener: Arc<dyn TaskListener>) -> TaskResult<()> {
        let _guard = self.inner.notify_lock.lock();
        let status = self.status();
        if status.is_final() {
            return Err(TaskError::AlreadyFinal(status));
        }
        self.inner.listeners.lock().add(tier, listener);
        Ok(())
    }

    /// Detach a listener; returns whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) -> bool {
        self.inner.listeners.lock().remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Report progress and a description of the current step
    pub fn set_progress(&self, percent: u32, description: impl Into<String>) -> TaskResult<()> {
        self.update_progress(percent, Some(description.into()))
    }

    /// Report progress, keeping the current description
    pub fn set_percent(&self, percent: u32) -> TaskResult<()> {
        let description = self.inner.state.lock().description.clone();
        self.update_progress(percent, description)
    }

    /// Report a description, keeping the current percent
    pub fn set_description(&self, description: impl Into<String>) -> TaskResult<()> {
        let percent = u32::from(self.progress());
        self.update_progress(percent, Some(description.into()))
    }

    fn update_progress(&self, percent: u32, description: Option<String>) -> TaskResult<()> {
        if percent > 100 {
            return Err(TaskError::InvalidProgress(percent));
        }
        let percent = percent as u8;

        let _guard = self.inner.notify_lock.lock();
        {
            let mut state = self.inner.state.lock();
            if state.status.is_final() {
                return Err(TaskError::AlreadyFinal(state.status));
            }
            state.progress = percent;
            state.description = description.clone();
        }

        let listeners = self.inner.listeners.lock().snapshot();
        notify_each(self, &listeners, "progress change", |l| {
            l.on_progress_changed(self, percent, description.as_deref())
        });
        Ok(())
    }

    /// Move to `next`, record timing and notify listeners in order
    fn transition(&self, next: TaskStatus) -> TaskResult<TaskStatus> {
        let _guard = self.inner.notify_lock.lock();
        let prev = {
            let mut state = self.inner.state.lock();
            let prev = state.status;
            if !prev.can_transition_to(next) {
                return Err(TaskError::InvalidTransition { from: prev, to: next });
            }

            let now = Instant::now();
            match (prev, next) {
                (TaskStatus::Pending, TaskStatus::Started) => {
                    state.started_at = Some(now);
                    state.started_wall = Some(Utc::now());
                }
                (TaskStatus::Paused, TaskStatus::Started) => {
                    // Shift the start forward so the pause is not counted
                    if let (Some(start), Some(paused)) = (state.started_at, state.paused_at.take()) {
                        state.started_at = Some(start + now.saturating_duration_since(paused));
                    }
                }
                (TaskStatus::Started, TaskStatus::Paused) => {
                    state.paused_at = Some(now);
                }
                _ => {}
            }
            if next.is_final() {
                state.stopped_at = Some(now);
                state.finished_wall = Some(Utc::now());
            }
            state.status = next;
            prev
        };

        self.inner.state_changed.notify_all();
        self.inner.status_tx.send_replace(next);

        let listeners = self.inner.listeners.lock().snapshot();
        notify_each(self, &listeners, "status change", |l| {
            l.on_status_changed(self, prev, next)
        });
        Ok(prev)
    }

    /// Pause a running task; the worker blocks at its next checkpoint
    pub fn pause(&self) -> TaskResult<()> {
        if !self.is_pauseable() {
            return Err(TaskError::NotPauseable);
        }
        let _guard = self.inner.notify_lock.lock();
        self.transition(TaskStatus::Paused)?;
        self.inner.gate.close();
        Ok(())
    }

    /// Resume a paused task, unblocking the worker
    pub fn resume(&self) -> TaskResult<()> {
        if !self.is_pauseable() {
            return Err(TaskError::NotPauseable);
        }
        let _guard = self.inner.notify_lock.lock();
        self.transition(TaskStatus::Started)?;
        self.inner.gate.open();
        Ok(())
    }

    /// Pause checkpoint: blocks while paused, fails once cancelled
    pub fn checkpoint(&self) -> TaskResult<()> {
        self.inner.gate.wait_open(&self.inner.cancel_requested);
        if self.is_cancel_requested() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Request cancellation.
    ///
    /// A pending task is cancelled immediately. A running task is only
    /// cancelled when `may_interrupt` is set: a paused task is resumed first,
    /// then the body observes the request at its next checkpoint. Returns
    /// whether the request was accepted.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let work = {
            let _guard = self.inner.notify_lock.lock();
            match self.status() {
                TaskStatus::Pending => {
                    self.inner.cancel_requested.store(true, Ordering::SeqCst);
                    if self.transition(TaskStatus::Cancelled).is_err() {
                        return false;
                    }
                    debug!("Task '{}' cancelled before start", self.title());
                    self.inner.listeners.lock().clear();
                    self.inner.work.lock().take()
                }
                TaskStatus::Started | TaskStatus::Paused if may_interrupt => {
                    if self.inner.cancel_requested.swap(true, Ordering::SeqCst) {
                        return false;
                    }
                    if self.status() == TaskStatus::Paused {
                        if let Err(e) = self.transition(TaskStatus::Started) {
                            warn!("Failed to resume task '{}' for cancellation: {}", self.title(), e);
                        }
                        self.inner.gate.open();
                    }
                    debug!("Cancellation requested for task '{}'", self.title());
                    self.inner.work.lock().clone()
                }
                _ => return false,
            }
        };

        // Outside the notification lock: composites cancel their children here
        if let Some(work) = work {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| work.on_cancel_erased())) {
                error!(
                    "Cancel hook panicked for task '{}': {}",
                    self.title(),
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }

    /// Block until the task reaches a final status
    pub fn wait(&self) -> TaskResult<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_final() {
            self.inner.state_changed.wait(&mut state);
        }
        state.outcome()
    }

    /// Like [`Task::wait`], giving up with `Timeout` after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> TaskResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.status.is_final() {
            if self
                .inner
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
                && !state.status.is_final()
            {
                return Err(TaskError::Timeout);
            }
        }
        state.outcome()
    }

    /// Receiver that observes every status the task moves to
    pub fn watch_status(&self) -> watch::Receiver<TaskStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Await the final status without blocking a runtime thread
    pub async fn wait_async(&self) -> TaskResult<()> {
        let mut rx = self.watch_status();
        if rx.wait_for(|status| status.is_final()).await.is_err() {
            return Err(TaskError::failed("Status channel closed"));
        }
        self.inner.state.lock().outcome()
    }

    /// Serializable snapshot for monitors
    pub fn info(&self) -> TaskInfo {
        let description = self.description();
        let state = self.inner.state.lock();
        TaskInfo {
            id: self.inner.id,
            title: self.inner.title.clone(),
            status: state.status,
            progress: state.progress,
            description,
            pauseable: self.inner.pauseable,
            created_at: self.inner.created_at.to_rfc3339(),
            started_at: state.started_wall.map(|t| t.to_rfc3339()),
            finished_at: state.finished_wall.map(|t| t.to_rfc3339()),
            duration_ms: state.duration().as_millis() as u64,
        }
    }

    /// Lines written through [`TaskContext::output`]
    pub fn output_lines(&self) -> Vec<OutputLine> {
        self.inner.journal.lock().clone()
    }

    pub(crate) fn push_output(&self, line: OutputLine) {
        self.inner.journal.lock().push(line);
    }

    pub(crate) fn downgrade(&self) -> WeakTask {
        WeakTask(Arc::downgrade(&self.inner))
    }

    /// Claim the one-shot submission slot
    pub(crate) fn claim_submission(&self) -> TaskResult<()> {
        self.inner
            .submitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| TaskError::AlreadySubmitted)
    }

    /// Drive the task on the current (worker) thread.
    ///
    /// Never panics and never returns an error: every outcome of the body is
    /// folded into the task's final status.
    pub(crate) fn run(&self) {
        let Some(work) = self.inner.work.lock().clone() else {
            debug!("Task '{}' has nothing to run ({})", self.title(), self.status());
            return;
        };

        {
            let _guard = self.inner.notify_lock.lock();
            if self.status() != TaskStatus::Pending {
                debug!("Skipping task '{}' in status {}", self.title(), self.status());
                return;
            }
            let listeners = self.inner.listeners.lock().snapshot();
            notify_each(self, &listeners, "before execute", |l| l.on_before_execute(self));
            if let Err(e) = self.transition(TaskStatus::Started) {
                warn!("Task '{}' could not start: {}", self.title(), e);
                return;
            }
        }

        let ctx = TaskContext { task: self.clone() };
        let outcome = catch_unwind(AssertUnwindSafe(|| work.execute_erased(&ctx)))
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));

        let finished = {
            let _guard = self.inner.notify_lock.lock();
            if self.status() == TaskStatus::Paused {
                // Body returned without reaching a checkpoint after a pause
                if let Err(e) = self.transition(TaskStatus::Started) {
                    warn!("Failed to resume task '{}': {}", self.title(), e);
                }
                self.inner.gate.open();
            }

            match outcome {
                Ok(output) if !self.is_cancel_requested() => {
                    *self.inner.output.lock() = Some(output);
                    self.finish(TaskStatus::Finished);
                    true
                }
                Ok(_) | Err(TaskError::Cancelled) => {
                    debug!("Task '{}' cancelled", self.title());
                    self.finish(TaskStatus::Cancelled);
                    false
                }
                Err(err) => {
                    self.fail(err);
                    false
                }
            }
        };

        if finished {
            let output = self.inner.output.lock();
            if let Some(output) = output.as_ref() {
                if let Err(panic) =
                    catch_unwind(AssertUnwindSafe(|| work.finished_erased(&**output)))
                {
                    error!(
                        "Finished hook panicked for task '{}': {}",
                        self.title(),
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        let listeners = self.inner.listeners.lock().snapshot();
        notify_each(self, &listeners, "after execute", |l| l.on_after_execute(self));
        self.inner.listeners.lock().clear();
        self.inner.work.lock().take();
    }

    fn finish(&self, status: TaskStatus) {
        if let Err(e) = self.transition(status) {
            error!("Task '{}' could not reach {}: {}", self.title(), status, e);
        }
    }

    fn fail(&self, err: TaskError) {
        let message = err.to_string();
        match &err {
            TaskError::SubtaskFailed { .. } => {
                error!("Task '{}' aborted: {}", self.title(), message)
            }
            _ => error!("Error on task '{}' execution: {}", self.title(), message),
        }

        let percent = u32::from(self.progress());
        if let Err(e) = self.update_progress(percent, Some(format!("Failed: {}", message))) {
            warn!("Failed to record failure of task '{}': {}", self.title(), e);
        }
        self.inner.state.lock().failure = Some(err);
        self.finish(TaskStatus::Failed);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("title", &self.inner.title)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}

/// Handle given to a running body
pub struct TaskContext {
    task: Task,
}

impl TaskContext {
    /// The task being executed
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn title(&self) -> &str {
        self.task.title()
    }

    pub fn set_progress(&self, percent: u32, description: impl Into<String>) -> TaskResult<()> {
        self.task.set_progress(percent, description)
    }

    pub fn set_percent(&self, percent: u32) -> TaskResult<()> {
        self.task.set_percent(percent)
    }

    pub fn set_description(&self, description: impl Into<String>) -> TaskResult<()> {
        self.task.set_description(description)
    }

    /// Pause checkpoint, see [`Task::checkpoint`]
    pub fn checkpoint(&self) -> TaskResult<()> {
        self.task.checkpoint()
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancel_requested()
    }
}
