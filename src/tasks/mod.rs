//! Tasks Module
//!
//! Cancellable, pausable, progress-reporting tasks executed on bounded
//! worker pools, with sequential grouping and monitor notification.

pub mod error;
pub mod executor;
pub mod group;
pub mod listener;
pub mod monitor;
pub mod output;
pub mod pool;
pub mod remote;
pub mod task;
pub mod types;

pub use error::{TaskError, TaskResult};
pub use executor::TaskExecutorService;
pub use group::{aggregate_progress, GroupTask};
pub use listener::{ListenerTier, TaskListener};
pub use monitor::{MonitorEvent, MonitorSummary, NoopMonitor, SharedMonitor, TaskMonitor, TaskRegistry};
pub use output::OutputLine;
pub use pool::{PoolStats, ThreadPoolKind, WorkerPool};
pub use remote::{RemoteTaskCallback, Severity, TaskCallbackBridge};
pub use task::{FnWork, Task, TaskContext, Work};
pub use types::{format_duration, TaskId, TaskInfo, TaskStatus};
