//! Core types for fare-crawler

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque key-value payload handed verbatim to the acquisition callback
pub type TaskParameters = serde_json::Map<String, Value>;

/// Unique identifier for a task
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random task id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id means "assign one on registration"
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a batch of tasks submitted together
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a short batch id such as `batch_1a2b3c4d`
    pub fn new() -> Self {
        let mut short = Uuid::new_v4().simple().to_string();
        short.truncate(8);
        Self(format!("batch_{short}"))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle status
///
/// ```text
/// initialized -> running -> completed
///                        -> failed
///                        -> retrying -> initialized
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued, not currently running
    Initialized,
    /// Callback currently executing
    Running,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Failed with a retry scheduled, not yet re-queued
    Retrying,
}

impl TaskStatus {
    /// Lowercase name as used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initialized => "initialized",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
        }
    }

    /// Completed and failed tasks never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Retrying, Initialized)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of scheduled acquisition work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique id (empty ids are replaced on registration)
    pub id: TaskId,
    /// Optional display name
    pub name: Option<String>,
    /// Request parameters passed to the callback
    pub parameters: TaskParameters,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// When the task was created
    pub created_time: DateTime<Utc>,
    /// Start of the current (or last) attempt; cleared when re-queued for retry
    pub start_time: Option<DateTime<Utc>>,
    /// End of the last attempt
    pub end_time: Option<DateTime<Utc>>,
    /// Start of the very first attempt; set once, never overwritten
    pub original_start_time: Option<DateTime<Utc>>,
    /// Payload produced by a successful callback
    pub result: Option<Value>,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Number of retries scheduled so far
    pub retry_count: u32,
}

impl Task {
    /// Create an `initialized` task with a fresh id
    pub fn new(parameters: TaskParameters) -> Self {
        Self {
            id: TaskId::new(),
            name: None,
            parameters,
            status: TaskStatus::Initialized,
            created_time: Utc::now(),
            start_time: None,
            end_time: None,
            original_start_time: None,
            result: None,
            last_error: None,
            retry_count: 0,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Move to `next`, rejecting anything that is not a lifecycle edge
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Seconds from the first attempt's start to the last attempt's end
    pub fn total_execution_time(&self) -> Option<f64> {
        match (self.original_start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// A task as described in configuration or produced by a planner
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Search request parameters
    #[serde(default)]
    pub api_params: TaskParameters,
}

/// Returned by `create_task`
#[derive(Clone, Debug, Serialize)]
pub struct TaskDescriptor {
    /// The new task's id
    pub task_id: TaskId,
    /// Always `initialized`
    pub status: TaskStatus,
    /// Creation timestamp
    pub created_time: DateTime<Utc>,
}

/// Outcome of the retry decision for a failed task
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RetryDecision {
    /// A retry has been scheduled
    Retrying {
        /// The task being retried
        task_id: TaskId,
        /// Backoff before the task re-enters the ready queue
        retry_in_seconds: f64,
    },
    /// The failure is terminal
    Error {
        /// Error kind of the failure
        error_type: String,
        /// Failure message
        error_message: String,
        /// The task concerned, if any
        task_id: Option<TaskId>,
    },
}

/// Outcome of running a single task through `run_one`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// Callback succeeded
    Success {
        /// The task that ran
        task_id: TaskId,
        /// Callback result payload
        result: Value,
    },
    /// Callback failed, retry scheduled
    Retrying {
        /// The task that ran
        task_id: TaskId,
        /// Backoff before the task re-enters the ready queue
        retry_in_seconds: f64,
    },
    /// Callback failed terminally, or nothing could be run
    Error {
        /// The task concerned, if one was selected
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        /// Error kind, when the failure came from the callback
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        /// Human-readable message
        message: String,
    },
}

impl RunOutcome {
    /// Error outcome that is not tied to a callback failure
    pub fn error(message: impl Into<String>) -> Self {
        RunOutcome::Error {
            task_id: None,
            error_type: None,
            message: message.into(),
        }
    }
}

impl From<RetryDecision> for RunOutcome {
    fn from(decision: RetryDecision) -> Self {
        match decision {
            RetryDecision::Retrying {
                task_id,
                retry_in_seconds,
            } => RunOutcome::Retrying {
                task_id,
                retry_in_seconds,
            },
            RetryDecision::Error {
                error_type,
                error_message,
                task_id,
            } => RunOutcome::Error {
                task_id,
                error_type: Some(error_type),
                message: error_message,
            },
        }
    }
}

/// Projection of a task's state for callers
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatusReport {
    /// Task id
    pub task_id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// Whether a result payload is present
    pub has_result: bool,
    /// Creation timestamp
    pub created_time: DateTime<Utc>,
    /// Start of the current attempt
    pub start_time: Option<DateTime<Utc>>,
    /// End of the last attempt
    pub end_time: Option<DateTime<Utc>>,
    /// Start of the first attempt
    pub original_start_time: Option<DateTime<Utc>>,
    /// Retries scheduled so far
    pub retry_count: u32,
    /// Most recent failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// `end_time - original_start_time` in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_execution_time: Option<f64>,
}

impl From<&Task> for TaskStatusReport {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            has_result: task.result.is_some(),
            created_time: task.created_time,
            start_time: task.start_time,
            end_time: task.end_time,
            original_start_time: task.original_start_time,
            retry_count: task.retry_count,
            last_error: task.last_error.clone(),
            total_execution_time: task.total_execution_time(),
        }
    }
}

/// Result of `status(task_id)`
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    /// The task exists
    Task(TaskStatusReport),
    /// The task id is unknown
    Error {
        /// Always `"error"`
        status: &'static str,
        /// Human-readable message
        message: String,
    },
}

impl StatusReport {
    /// Report for an unknown task id
    pub fn not_found(task_id: &TaskId) -> Self {
        StatusReport::Error {
            status: "error",
            message: format!("task {task_id} not found"),
        }
    }
}

/// Returned by `submit_batch`
#[derive(Clone, Debug, Serialize)]
pub struct BatchDescriptor {
    /// Generated batch id
    pub batch_id: BatchId,
    /// Ids of the registered tasks, in submission order
    pub task_ids: Vec<TaskId>,
}

/// Per-task entry of a batch summary
#[derive(Clone, Debug, Serialize)]
pub struct BatchTaskEntry {
    /// Status when the summary was taken
    pub status: TaskStatus,
    /// Display name
    pub name: Option<String>,
    /// Creation timestamp
    pub created_time: DateTime<Utc>,
    /// Start of the current attempt
    pub start_time: Option<DateTime<Utc>>,
    /// End of the last attempt
    pub end_time: Option<DateTime<Utc>>,
    /// Retries scheduled so far
    pub retry_count: u32,
    /// Most recent failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Task> for BatchTaskEntry {
    fn from(task: &Task) -> Self {
        Self {
            status: task.status,
            name: task.name.clone(),
            created_time: task.created_time,
            start_time: task.start_time,
            end_time: task.end_time,
            retry_count: task.retry_count,
            error: task.last_error.clone(),
        }
    }
}

/// Aggregated outcome of a batch
#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    /// Batch id
    pub batch_id: BatchId,
    /// Number of tasks submitted
    pub total_tasks: usize,
    /// Seconds spent waiting for the batch
    pub elapsed_time: f64,
    /// Per-task details
    pub tasks: BTreeMap<TaskId, BatchTaskEntry>,
    /// Tasks that reached `completed` or `failed`
    pub completed_tasks: usize,
    /// Set when some tasks had not reached a terminal state in time
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timeout: bool,
}

/// One leg segment of a fare
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightSegment {
    /// Marketing airline code followed by the (zero-padded) flight number
    pub flight_number: String,
    /// Cabin name followed by booking class
    pub cabin_class: String,
}

/// One fare offer parsed from a search response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FareRecord {
    /// Outbound departure date
    pub departure_date: Option<NaiveDate>,
    /// Inbound departure date
    pub return_date: Option<NaiveDate>,
    /// Fare before tax
    pub price: f64,
    /// Tax amount
    pub tax: f64,
    /// Outbound segments in order
    pub outbound_segments: Vec<FlightSegment>,
    /// Inbound segments in order
    pub inbound_segments: Vec<FlightSegment>,
}
