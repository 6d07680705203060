//! Task model shared by the dashboard client and server.
//!
//! Field names and enum spellings follow the server's JSON exactly; the
//! status strings (`pending`, `processing`, ...) are part of the wire
//! contract and must round-trip unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timestamp;

/// Default priority assigned to new tasks when the caller does not pick one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Server-assigned task identifier.
///
/// Opaque to the client; the only identity key for a task record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a server-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the task.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error and will not be retried.
    Failed,
    /// Failed at least once and is queued for another attempt.
    Retrying,
}

impl TaskStatus {
    /// All statuses in display order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Retrying,
    ];

    /// Wire spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Whether the task's `progress` value means anything in this status.
    #[must_use]
    pub const fn shows_progress(self) -> bool {
        matches!(self, Self::Processing | Self::Retrying)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Category of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Send an email.
    Email,
    /// Crunch a data set.
    DataProcessing,
    /// Convert a file between formats.
    FileConversion,
    /// Call an external API.
    ApiCall,
    /// Produce a report.
    ReportGeneration,
}

impl TaskType {
    /// All task types.
    pub const ALL: [Self; 5] = [
        Self::Email,
        Self::DataProcessing,
        Self::FileConversion,
        Self::ApiCall,
        Self::ReportGeneration,
    ];

    /// Wire spelling of this task type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::DataProcessing => "data_processing",
            Self::FileConversion => "file_conversion",
            Self::ApiCall => "api_call",
            Self::ReportGeneration => "report_generation",
        }
    }

    /// Human-readable label, e.g. `DATA PROCESSING`.
    #[must_use]
    pub fn label(self) -> String {
        self.as_str().replace('_', " ").to_uppercase()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// Full record of one task.
///
/// Every `task_update` frame carries a complete `Task`, so a record is
/// always replaced as a whole rather than patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub task_id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Category.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Arbitrary structured input for the worker.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Scheduling priority (higher runs first on the server).
    pub priority: i32,
    /// Creation time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last server-side modification.
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// When a worker first picked the task up.
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure description, present once a run has failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Number of retries recorded so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Completion percentage (0–100).
    #[serde(default)]
    pub progress: u8,
}

impl Task {
    /// Progress clamped to 100, or `None` when the status does not track it.
    #[must_use]
    pub fn visible_progress(&self) -> Option<u8> {
        self.status
            .shows_progress()
            .then_some(self.progress.min(100))
    }
}

/// Aggregate counts reported by the server.
///
/// These are taken verbatim from the server and are not recomputed from
/// the local task list; the two may disagree (the list is capped).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stats {
    /// Total number of tasks known to the server.
    #[serde(rename = "total_tasks")]
    pub total: u64,
    /// Tasks waiting in the queue.
    pub pending: u64,
    /// Tasks currently running.
    pub processing: u64,
    /// Tasks finished successfully.
    pub completed: u64,
    /// Tasks that failed permanently.
    pub failed: u64,
    /// Tasks waiting for another attempt.
    pub retrying: u64,
}

impl Stats {
    /// Counts tasks by status.
    ///
    /// Used by servers that derive the overview from their own store.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Retrying => stats.retrying += 1,
            }
        }
        stats
    }

    /// Count for a single status.
    #[must_use]
    pub const fn count(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Processing => self.processing,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Retrying => self.retrying,
        }
    }
}

/// Request body for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task name.
    pub name: String,
    /// Category.
    pub task_type: TaskType,
    /// Priority, accepted range 1–10 on the server.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Structured worker input.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

const fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewTask {
    /// Creates a request with default priority and an empty payload.
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            task_type,
            priority: DEFAULT_PRIORITY,
            payload: Map::new(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Parses `text` as a JSON object and uses it as the payload.
    ///
    /// Blank input keeps the payload empty.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `text` is not a JSON object.
    pub fn with_payload_json(mut self, text: &str) -> Result<Self, serde_json::Error> {
        let text = text.trim();
        if !text.is_empty() {
            self.payload = serde_json::from_str(text)?;
        }
        Ok(self)
    }
}
