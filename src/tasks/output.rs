//! Task Output
//!
//! Per-task output journal and step ("phase") reporting for task bodies.

use log::{log, Level};
use std::fmt;

use super::error::TaskResult;
use super::task::TaskContext;

const LINE_WIDTH: usize = 72;
const MARK_SUCCESS: &str = "✓";
const MARK_ERROR: &str = "⛔";

/// One line written by a task body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

impl TaskContext {
    /// Append a line to the task's output and mirror it to the log
    pub fn output(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log!(level, "[{}] {}", self.title(), message);
        self.task().push_output(OutputLine { level, message });
    }

    /// Run one step of the body and record its outcome as a dotted line.
    ///
    /// The step's result is returned unchanged.
    pub fn phase<R, F>(&self, description: &str, step: F) -> TaskResult<R>
    where
        F: FnOnce() -> TaskResult<R>,
    {
        let result = step();
        let line = match &result {
            Ok(_) => phase_line(description, MARK_SUCCESS, None),
            Err(e) => phase_line(description, MARK_ERROR, Some(&e.to_string())),
        };
        self.output(Level::Debug, line);
        result
    }
}

/// ` • step ............ ✓`, with the error on a second line when present
fn phase_line(step: &str, mark: &str, error: Option<&str>) -> String {
    let used = step.chars().count() + 1;
    let dots = ".".repeat(LINE_WIDTH.saturating_sub(used));
    match error {
        Some(error) => format!(" • {}{}{}\n   {}", step, dots, mark, error),
        None => format!(" • {}{}{}", step, dots, mark),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::error::TaskError;
    use crate::tasks::task::Task;
    use crate::tasks::types::TaskStatus;

    #[test]
    fn test_phase_line_width() {
        let line = phase_line("Checkout", MARK_SUCCESS, None);
        assert!(line.starts_with(" • Checkout."));
        assert!(line.ends_with(MARK_SUCCESS));
        assert_eq!(line.chars().count(), 3 + LINE_WIDTH);
    }

    #[test]
    fn test_phase_records_outcome() {
        let task = Task::from_fn("Phases", |ctx| {
            ctx.phase("Prepare", || Ok(()))?;
            ctx.output(Level::Info, "prepared");
            ctx.phase("Deploy", || -> TaskResult<()> { Err(TaskError::failed("no space")) })
        });
        task.run();

        assert_eq!(task.status(), TaskStatus::Failed);
        let lines = task.output_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].message.ends_with(MARK_SUCCESS));
        assert_eq!(lines[1].level, Level::Info);
        assert_eq!(lines[1].message, "prepared");
        assert!(lines[2].message.contains(MARK_ERROR));
        assert!(lines[2].message.ends_with("no space"));
    }
}
