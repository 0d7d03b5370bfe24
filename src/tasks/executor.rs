//! Task Executor Service
//!
//! Single entry point for running tasks. Decides which pool a task runs on
//! and which monitor, if any, gets to see it.

use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;

use super::error::TaskResult;
use super::listener::TaskListener;
use super::monitor::{MonitorListener, NoopMonitor, SharedMonitor, TaskMonitor};
use super::pool::{PoolStats, ThreadPoolKind, WorkerPool};
use super::task::Task;
use super::types::{format_duration, TaskStatus};
use crate::config::{ConfigError, ExecutorConfig};

/// Monitor slot key: one per pool kind plus a default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MonitorSlot {
    Default,
    Pool(ThreadPoolKind),
}

struct ExecutorInner {
    queued: WorkerPool,
    demand: WorkerPool,
    monitors: DashMap<MonitorSlot, SharedMonitor>,
    status_logger: Arc<dyn TaskListener>,
}

/// Executor service handle; clones share the same pools
#[derive(Clone)]
pub struct TaskExecutorService {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutorService {
    /// Validate the configuration and start both pools
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let queued = WorkerPool::new(ThreadPoolKind::Queued, config.queued)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let demand = WorkerPool::new(ThreadPoolKind::Demand, config.demand)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        info!("Task executor started");
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                queued,
                demand,
                monitors: DashMap::new(),
                status_logger: Arc::new(StatusLogger),
            }),
        })
    }

    /// Run in the background queue, visible to the Queued monitor
    pub fn enqueue_task(&self, task: &Task) -> TaskResult<()> {
        self.submit(task, ThreadPoolKind::Queued, false)
    }

    /// Run promptly, visible to the Demand monitor
    pub fn execute_task(&self, task: &Task) -> TaskResult<()> {
        self.submit(task, ThreadPoolKind::Demand, false)
    }

    /// Run promptly without any monitor registration
    pub fn quiet_task(&self, task: &Task) -> TaskResult<()> {
        self.submit(task, ThreadPoolKind::Demand, true)
    }

    fn submit(&self, task: &Task, kind: ThreadPoolKind, quiet: bool) -> TaskResult<()> {
        task.claim_submission()?;

        if !quiet {
            let monitor = self.monitor(kind);
            task.add_listener(Arc::new(MonitorListener(monitor.clone())))?;
            monitor.register_task(task);
        }
        task.add_system_listener(self.inner.status_logger.clone())?;

        debug!(
            "Submitting task '{}' to {} pool{}",
            task.title(),
            kind,
            if quiet { " (quiet)" } else { "" }
        );
        if let Err(e) = self.pool(kind).submit(task.clone()) {
            // Never left pending with nobody to run it
            task.cancel(false);
            return Err(e);
        }
        Ok(())
    }

    /// Attach the monitor for one pool kind; the first attachment wins
    pub fn attach_monitor(&self, kind: ThreadPoolKind, monitor: SharedMonitor) -> bool {
        self.attach(MonitorSlot::Pool(kind), monitor)
    }

    /// Attach the fallback monitor used by kinds without their own
    pub fn attach_default_monitor(&self, monitor: SharedMonitor) -> bool {
        self.attach(MonitorSlot::Default, monitor)
    }

    fn attach(&self, slot: MonitorSlot, monitor: SharedMonitor) -> bool {
        let mut attached = false;
        self.inner.monitors.entry(slot).or_insert_with(|| {
            attached = true;
            monitor
        });
        if !attached {
            warn!("Monitor for {:?} already attached, ignoring", slot);
        }
        attached
    }

    /// Monitor for `kind`, falling back to the default one, then to a no-op
    pub fn monitor(&self, kind: ThreadPoolKind) -> SharedMonitor {
        self.inner
            .monitors
            .get(&MonitorSlot::Pool(kind))
            .or_else(|| self.inner.monitors.get(&MonitorSlot::Default))
            .map(|m| m.value().clone())
            .unwrap_or_else(|| Arc::new(NoopMonitor))
    }

    pub fn pool_stats(&self, kind: ThreadPoolKind) -> PoolStats {
        self.pool(kind).stats()
    }

    /// Stop admission and wait for queued work to drain
    pub fn shutdown(&self) {
        self.inner.queued.shutdown();
        self.inner.demand.shutdown();
        info!("Task executor stopped");
    }

    fn pool(&self, kind: ThreadPoolKind) -> &WorkerPool {
        match kind {
            ThreadPoolKind::Queued => &self.inner.queued,
            ThreadPoolKind::Demand => &self.inner.demand,
        }
    }
}

/// Diagnostic listener attached to every submission
struct StatusLogger;

impl TaskListener for StatusLogger {
    fn on_status_changed(&self, task: &Task, prev: TaskStatus, next: TaskStatus) {
        if next.is_final() {
            debug!(
                "Task '{}' state changed: {} -> {} (duration: {})",
                task.title(),
                prev,
                next,
                format_duration(task.duration())
            );
        } else {
            debug!("Task '{}' state changed: {} -> {}", task.title(), prev, next);
        }
    }
}
