//! Worker Pools
//!
//! Bounded, queue-backed worker pools. Two kinds exist per executor:
//! - `Queued`: small fixed set of workers for background work
//! - `Demand`: larger set of workers spawned on demand, idle ones retire
//!
//! Admission blocks while the queue is full instead of growing it.

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::error::{TaskError, TaskResult};
use super::task::Task;
use crate::config::PoolConfig;

/// Pool a task is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPoolKind {
    /// Small bounded background queue
    Queued,
    /// Larger on-demand pool for work expected to run promptly
    Demand,
}

impl ThreadPoolKind {
    fn thread_prefix(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Demand => "demand",
        }
    }
}

impl fmt::Display for ThreadPoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Demand => write!(f, "Demand"),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub kind: ThreadPoolKind,
    pub workers: usize,
    pub idle: usize,
    pub queued: usize,
}

struct PoolState {
    queue: VecDeque<Task>,
    workers: usize,
    idle: usize,
    next_worker: usize,
    shutdown: bool,
    handles: Vec<thread::JoinHandle<()>>,
}

struct PoolShared {
    kind: ThreadPoolKind,
    config: PoolConfig,
    state: Mutex<PoolState>,
    job_ready: Condvar,
    slot_free: Condvar,
}

/// Bounded worker pool
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create the pool and start its core workers
    pub fn new(kind: ThreadPoolKind, config: PoolConfig) -> TaskResult<Self> {
        let shared = Arc::new(PoolShared {
            kind,
            config,
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(config.queue_capacity),
                workers: 0,
                idle: 0,
                next_worker: 0,
                shutdown: false,
                handles: Vec::new(),
            }),
            job_ready: Condvar::new(),
            slot_free: Condvar::new(),
        });

        {
            let mut state = shared.state.lock();
            for _ in 0..config.core_workers {
                spawn_worker(&shared, &mut state)?;
            }
        }

        info!(
            "{} pool started: {} core / {} max workers, queue capacity {}",
            kind, config.core_workers, config.max_workers, config.queue_capacity
        );
        Ok(Self { shared })
    }

    pub fn kind(&self) -> ThreadPoolKind {
        self.shared.kind
    }

    /// Queue a task, blocking while the queue is full
    pub fn submit(&self, task: Task) -> TaskResult<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        while !state.shutdown && state.queue.len() >= shared.config.queue_capacity {
            debug!("{} pool queue full, waiting to admit '{}'", shared.kind, task.title());
            shared.slot_free.wait(&mut state);
        }
        if state.shutdown {
            return Err(TaskError::PoolShutdown(shared.kind));
        }

        state.queue.push_back(task);
        if state.queue.len() > state.idle && state.workers < shared.config.max_workers {
            spawn_worker(shared, &mut state)?;
        }
        shared.job_ready.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            kind: self.shared.kind,
            workers: state.workers,
            idle: state.idle,
            queued: state.queue.len(),
        }
    }

    /// Stop admission, let workers drain the queue and join them
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            std::mem::take(&mut state.handles)
        };
        self.shared.job_ready.notify_all();
        self.shared.slot_free.notify_all();

        let current = thread::current().id();
        for handle in handles {
            // A worker shutting down its own pool must not join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("{} pool worker terminated abnormally", self.shared.kind);
            }
        }
        info!("{} pool stopped", self.shared.kind);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState) -> TaskResult<()> {
    state.next_worker += 1;
    let name = format!("{}-worker-{}", shared.kind.thread_prefix(), state.next_worker);
    let worker_shared = Arc::clone(shared);

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(worker_shared))
        .map_err(|e| TaskError::failed(format!("Failed to spawn {}: {}", name, e)))?;

    state.workers += 1;
    state.handles.retain(|h| !h.is_finished());
    state.handles.push(handle);
    debug!("Spawned {} ({} workers)", name, state.workers);
    Ok(())
}

fn worker_loop(shared: Arc<PoolShared>) {
    let keep_alive = Duration::from_secs(shared.config.keep_alive_secs);
    let mut state = shared.state.lock();

    loop {
        if let Some(task) = state.queue.pop_front() {
            shared.slot_free.notify_one();
            drop(state);

            debug!("{} worker picked up task '{}'", shared.kind, task.title());
            task.run();

            state = shared.state.lock();
            continue;
        }

        if state.shutdown {
            break;
        }

        state.idle += 1;
        let timed_out = if state.workers > shared.config.core_workers {
            shared.job_ready.wait_for(&mut state, keep_alive).timed_out()
        } else {
            shared.job_ready.wait(&mut state);
            false
        };
        state.idle -= 1;

        if timed_out
            && state.queue.is_empty()
            && !state.shutdown
            && state.workers > shared.config.core_workers
        {
            debug!("Retiring idle {} worker", shared.kind);
            break;
        }
    }

    state.workers -= 1;
}
