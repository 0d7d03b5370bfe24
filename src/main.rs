//! Demo runner
//!
//! Builds a group of simulated steps, runs it through the executor and prints
//! what a monitor sees.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use taskdeck::tasks::{
    format_duration, FnWork, GroupTask, MonitorEvent, Task, TaskContext, TaskError,
    TaskExecutorService, TaskRegistry, TaskResult, ThreadPoolKind,
};
use taskdeck::ExecutorConfig;

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "Run a group of simulated tasks through the executor", long_about = None)]
struct Cli {
    #[arg(short, long, help = "Executor configuration (TOML)")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 4, help = "Number of steps in the group")]
    steps: usize,

    #[arg(long, help = "Make the step with this index (0-based) fail")]
    fail_at: Option<usize>,

    #[arg(long, help = "Keep going after a failed step")]
    continue_on_error: bool,

    #[arg(long, help = "Use the background queue instead of the demand pool")]
    enqueue: bool,
}

fn step(index: usize, fail: bool) -> Task {
    Task::new(
        format!("Step {}", index + 1),
        FnWork::new(move |ctx: &TaskContext| -> TaskResult<()> {
            for percent in (0..=100).step_by(20) {
                ctx.checkpoint()?;
                ctx.set_progress(percent, format!("Working ({}%)", percent))?;
                if fail && percent == 60 {
                    return Err(TaskError::failed("simulated failure"));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Ok(())
        })
        .pauseable(true),
    )
}

/// Wait for the event printer, reporting a panic instead of dropping it
async fn finish_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Monitor printer stopped abnormally: {}", e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    taskdeck::init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ExecutorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ExecutorConfig::default(),
    };
    let executor = TaskExecutorService::new(config)?;

    let registry = Arc::new(TaskRegistry::new());
    executor.attach_default_monitor(registry.clone());
    let mut events = registry.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::Cleared) => {
                    println!("monitor: registry cleared");
                    break;
                }
                Ok(event) => println!("monitor: {}", serde_json::to_string(&event).unwrap_or_default()),
                Err(RecvError::Lagged(skipped)) => println!("monitor: skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let steps = (0..cli.steps)
        .map(|i| step(i, cli.fail_at == Some(i)))
        .collect();
    let group = GroupTask::new(&executor, "Demo", !cli.continue_on_error, steps);

    let kind = if cli.enqueue {
        ThreadPoolKind::Queued
    } else {
        ThreadPoolKind::Demand
    };
    info!("Running '{}' on the {} pool", group.title(), kind);
    match kind {
        ThreadPoolKind::Queued => executor.enqueue_task(&group)?,
        ThreadPoolKind::Demand => executor.execute_task(&group)?,
    }

    let outcome = group.wait_async().await;
    println!(
        "{}: {} ({}) in {}",
        group.title(),
        group.status(),
        group.description(),
        format_duration(group.duration())
    );

    let summary = registry.summary();
    if summary.total > 0 {
        println!(
            "monitor: {} running, {} failed, {} stopped",
            summary.running, summary.failed, summary.stopped
        );
        printer.abort();
    } else {
        finish_printer(printer).await;
    }

    executor.shutdown();
    outcome.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_printer_reports_panic() {
        assert!(finish_printer(tokio::spawn(async {})).await);

        let broken = tokio::spawn(async {
            if true {
                panic!("printer crashed");
            }
        });
        assert!(!finish_printer(broken).await);
    }
}
