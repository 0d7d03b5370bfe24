//! Task Error Types
//!
//! Error handling for task execution, lifecycle contract checks and pool admission.

use thiserror::Error;

use super::pool::ThreadPoolKind;
use super::types::TaskStatus;

/// Task-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    // Outcome signals
    #[error("Task cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("Subtask '{subtask}' failed: {message}")]
    SubtaskFailed { subtask: String, message: String },

    #[error("Task panicked: {0}")]
    Panicked(String),

    // Contract violations
    #[error("Progress value should be from 0 to 100, got {0}")]
    InvalidProgress(u32),

    #[error("Task is not pauseable")]
    NotPauseable,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task is already {0}")]
    AlreadyFinal(TaskStatus),

    #[error("Task was already submitted for execution")]
    AlreadySubmitted,

    // Admission / waiting
    #[error("{0} pool is shut down")]
    PoolShutdown(ThreadPoolKind),

    #[error("Timed out waiting for task")]
    Timeout,
}

impl TaskError {
    /// Build a failure from any displayable error
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether this is the cancellation signal rather than a real failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error is a programmer error rejected at the call site
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidProgress(_)
                | Self::NotPauseable
                | Self::InvalidTransition { .. }
                | Self::AlreadyFinal(_)
                | Self::AlreadySubmitted
        )
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            TaskError::Cancelled
        } else {
            TaskError::Failed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Failed(format!("Serialization error: {}", err))
    }
}

/// Result type alias for task operations
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_message() {
        let err = TaskError::SubtaskFailed {
            subtask: "Compile".to_string(),
            message: "exit code 2".to_string(),
        };
        assert_eq!(err.to_string(), "Subtask 'Compile' failed: exit code 2");
    }

    #[test]
    fn test_classification() {
        assert!(TaskError::Cancelled.is_cancellation());
        assert!(!TaskError::failed("boom").is_cancellation());
        assert!(TaskError::InvalidProgress(101).is_contract_violation());
        assert!(!TaskError::Timeout.is_contract_violation());
    }

    #[test]
    fn test_interrupted_io_is_cancellation() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted");
        assert_eq!(TaskError::from(io), TaskError::Cancelled);
    }
}
