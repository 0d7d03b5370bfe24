//! Task Types
//!
//! Value types shared by the task framework: lifecycle status, identifiers
//! and the serializable snapshot handed to monitors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued and not started yet
    Pending,
    /// Worker thread is executing the task body
    Started,
    /// Worker thread is blocked at a pause checkpoint
    Paused,
    /// Task body returned normally
    Finished,
    /// Task body returned an error
    Failed,
    /// Task was cancelled before or during execution
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Whether no transition may leave this status
    pub fn is_final(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Whether the task is still queued or running
    pub fn is_active(self) -> bool {
        !self.is_final()
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Cancelled)
                | (Started, Paused)
                | (Paused, Started)
                | (Started, Finished)
                | (Started, Failed)
                | (Started, Cancelled)
        )
    }

    /// Human-readable description shown next to the task
    pub fn description(self) -> &'static str {
        match self {
            Self::Pending => "Waiting",
            Self::Started => "Executing",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Icon name for presentation layers
    pub fn icon(self) -> &'static str {
        match self {
            Self::Pending => "task-pending",
            Self::Started => "task-started",
            Self::Paused => "task-paused",
            Self::Finished => "task-finished",
            Self::Failed => "task-failed",
            Self::Cancelled => "task-cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Started => write!(f, "STARTED"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task info for monitors and remote consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub description: String,
    pub pauseable: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub duration_ms: u64,
}

const ONE_SECOND: u64 = 1000;
const ONE_MINUTE: u64 = ONE_SECOND * 60;
const ONE_HOUR: u64 = ONE_MINUTE * 60;
const ONE_DAY: u64 = ONE_HOUR * 24;

/// Format an elapsed duration as `[Nd,][HH:]MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let mut millis = duration.as_millis() as u64;
    if millis < ONE_SECOND {
        return "00:00".to_string();
    }

    let mut out = String::new();
    let days = millis / ONE_DAY;
    if days > 0 {
        millis -= days * ONE_DAY;
        out.push_str(&format!("{}d,", days));
    }
    if days > 0 || millis / ONE_HOUR > 0 {
        let hours = millis / ONE_HOUR;
        millis -= hours * ONE_HOUR;
        out.push_str(&format!("{:02}:", hours));
    }
    let minutes = millis / ONE_MINUTE;
    millis -= minutes * ONE_MINUTE;
    out.push_str(&format!("{:02}:{:02}", minutes, millis / ONE_SECOND));
    out
}
