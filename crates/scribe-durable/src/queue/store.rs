//! JobStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Illegal state transition (terminal states are write-once)
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobState,
        to: JobState,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, never claimed
    Pending,

    /// Claimed by a dispatcher, handler in flight
    Running,

    /// Handler returned success (terminal)
    Done,

    /// Permanent failure or retries exhausted (terminal)
    Failed,

    /// Transient failure, visible again at `next_visible_at`
    Retrying,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

impl JobState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A job handed to a dispatcher by `claim`
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Attempt count after this claim (1-based)
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Full job row, for introspection and tests
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of `fail_transient`
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Job will be retried after `delay`
    WillRetry { next_attempt: u32, delay: Duration },

    /// Retries exhausted, job is failed
    ExhaustedRetries,
}

/// Persistent job queue
///
/// Implementations must be thread-safe; `claim` must be serialized per job
/// row so no two dispatchers observe the same job.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a pending job with attempts=0, visible immediately.
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, QueueError>;

    /// Atomically take up to `limit` claimable jobs of `job_type`.
    ///
    /// Claimable: `pending`, or `retrying` with `next_visible_at <= now`.
    /// Each returned job has transitioned to `running` with `attempts`
    /// incremented. Tie-break is oldest `created_at` first.
    async fn claim(&self, job_type: &str, limit: usize) -> Result<Vec<ClaimedJob>, QueueError>;

    /// running -> done. Idempotent on `done`; errors on any other state.
    async fn complete(&self, job_id: Uuid, result: serde_json::Value)
        -> Result<(), QueueError>;

    /// running -> retrying with `next_visible_at = now + backoff`, or
    /// running -> failed when attempts have reached max_attempts.
    async fn fail_transient(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> Result<FailureOutcome, QueueError>;

    /// Any non-terminal state -> failed. No-op when already failed.
    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Boot-time: reset every `running` row to `retrying`, visible now.
    /// Returns the number of rows reset.
    async fn recover_stale(&self) -> Result<usize, QueueError>;

    /// Boot-time: make `retrying` rows whose visibility is overdue by more
    /// than `older_than` visible now. Returns the number of rows touched.
    async fn requeue_overdue(&self, older_than: Duration) -> Result<usize, QueueError>;

    /// Fetch one job row.
    async fn get(&self, job_id: Uuid) -> Result<JobRecord, QueueError>;

    /// Count jobs of `job_type` in `state`.
    async fn count_in_state(&self, job_type: &str, state: JobState) -> Result<u64, QueueError>;
}
