//! Taskdeck
//!
//! Task execution framework: long-running work units with a strict lifecycle,
//! two bounded worker pools and observers for status and progress.

pub mod config;
pub mod tasks;

pub use config::{ConfigError, ExecutorConfig, PoolConfig};
pub use tasks::{GroupTask, Task, TaskError, TaskExecutorService, TaskResult, TaskStatus};

/// Initialise the `env_logger` backend.
///
/// Honors `RUST_LOG` and defaults to `info`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
