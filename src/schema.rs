//! Job record types shared by all persistence backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a job record.
///
/// `Queued` and `Locked` are the only non-terminal states; once a job
/// reaches `Completed` or `Failed` no further transition occurs and no
/// claim will ever succeed against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed once `run_at` passes.
    Queued,
    /// Claimed by a worker and currently executing.
    Locked,
    /// Finished successfully. Terminal.
    Completed,
    /// Exhausted its attempts or hit a permanent error. Terminal.
    Failed,
}

impl JobStatus {
    /// The canonical string form, as stored by relational backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Locked => "locked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the canonical string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "locked" => Some(Self::Locked),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further transition can occur from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable job record.
#[derive(Debug, Clone)]
pub struct Job {
    /// Backend-assigned identity.
    pub id: i64,
    /// Name of the registered job type to execute.
    pub name: String,
    /// JSON payload passed to the handler; the serialized form of the
    /// [`crate::BackgroundJob`] value that was enqueued.
    pub args: Value,
    /// Logical partition this job belongs to.
    pub queue: String,
    /// Claim precedence; lower values are claimed first.
    pub priority: i16,
    /// Earliest time at which the job may be claimed.
    pub run_at: DateTime<Utc>,
    /// Number of execution attempts made so far.
    pub attempts: i32,
    /// Attempt ceiling; exceeding it is terminal.
    pub max_attempts: i32,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Detail of the most recent failure, for diagnostics.
    pub last_error: Option<String>,
    /// When the active claim was taken, if any.
    pub locked_at: Option<DateTime<Utc>>,
    /// Identity of the worker holding the active claim, if any.
    pub locked_by: Option<String>,
}

/// A job record as handed to [`crate::Backend::schedule`], before an
/// identity is assigned.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Name of the registered job type to execute.
    pub name: String,
    /// JSON payload passed to the handler.
    pub args: Value,
    /// Logical partition for the job.
    pub queue: String,
    /// Claim precedence; lower values are claimed first.
    pub priority: i16,
    /// Earliest time at which the job may be claimed.
    pub run_at: DateTime<Utc>,
    /// Attempt ceiling for this job.
    pub max_attempts: i32,
}
