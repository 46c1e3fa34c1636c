//! In-memory implementation of JobStore for testing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{
    ClaimedJob, FailureOutcome, JobRecord, JobState, JobStore, QueueError,
};

struct JobEntry {
    job_type: String,
    payload: serde_json::Value,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    next_visible_at: DateTime<Utc>,
    last_error: Option<String>,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory job queue with the same semantics as the SQLite implementation.
///
/// Primarily for worker and handler tests; claims are serialized by the
/// write lock.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    default_max_attempts: u32,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            default_max_attempts: 5,
        }
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Number of jobs currently held, any state.
    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Ids of jobs of `job_type` in `state`, for assertions.
    pub fn ids_in_state(&self, job_type: &str, state: JobState) -> Vec<Uuid> {
        self.jobs
            .read()
            .iter()
            .filter(|(_, j)| j.job_type == job_type && j.state == state)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        self.jobs.write().insert(
            id,
            JobEntry {
                job_type: job_type.to_string(),
                payload,
                state: JobState::Pending,
                attempts: 0,
                max_attempts: self.default_max_attempts,
                next_visible_at: now,
                last_error: None,
                result: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn claim(&self, job_type: &str, limit: usize) -> Result<Vec<ClaimedJob>, QueueError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        let mut claimable: Vec<(Uuid, DateTime<Utc>)> = jobs
            .iter()
            .filter(|(_, j)| {
                j.job_type == job_type
                    && (j.state == JobState::Pending
                        || (j.state == JobState::Retrying && j.next_visible_at <= now))
            })
            .map(|(id, j)| (*id, j.created_at))
            .collect();
        claimable.sort_by_key(|(_, created_at)| *created_at);
        claimable.truncate(limit);

        let mut claimed = Vec::with_capacity(claimable.len());
        for (id, _) in claimable {
            let entry = jobs.get_mut(&id).ok_or(QueueError::JobNotFound(id))?;
            entry.state = JobState::Running;
            entry.attempts += 1;
            entry.updated_at = now;
            claimed.push(ClaimedJob {
                id,
                job_type: entry.job_type.clone(),
                payload: entry.payload.clone(),
                attempts: entry.attempts,
                max_attempts: entry.max_attempts,
            });
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;

        match entry.state {
            JobState::Running => {
                entry.state = JobState::Done;
                entry.result = Some(result);
                entry.updated_at = Utc::now();
                Ok(())
            }
            JobState::Done => Ok(()),
            from => Err(QueueError::InvalidTransition {
                job_id,
                from,
                to: JobState::Done,
            }),
        }
    }

    async fn fail_transient(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> Result<FailureOutcome, QueueError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;

        if entry.state != JobState::Running {
            return Err(QueueError::InvalidTransition {
                job_id,
                from: entry.state,
                to: JobState::Retrying,
            });
        }

        let now = Utc::now();
        entry.last_error = Some(error.to_string());
        entry.updated_at = now;

        if entry.attempts < entry.max_attempts {
            entry.state = JobState::Retrying;
            entry.next_visible_at = now
                + chrono::Duration::from_std(backoff)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            Ok(FailureOutcome::WillRetry {
                next_attempt: entry.attempts + 1,
                delay: backoff,
            })
        } else {
            entry.state = JobState::Failed;
            Ok(FailureOutcome::ExhaustedRetries)
        }
    }

    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;

        match entry.state {
            JobState::Done => Err(QueueError::InvalidTransition {
                job_id,
                from: JobState::Done,
                to: JobState::Failed,
            }),
            JobState::Failed => Ok(()),
            _ => {
                entry.state = JobState::Failed;
                entry.last_error = Some(error.to_string());
                entry.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    async fn recover_stale(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut count = 0;
        for entry in self.jobs.write().values_mut() {
            if entry.state == JobState::Running {
                entry.state = JobState::Retrying;
                entry.next_visible_at = now;
                entry.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn requeue_overdue(&self, older_than: Duration) -> Result<usize, QueueError> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut count = 0;
        for entry in self.jobs.write().values_mut() {
            if entry.state == JobState::Retrying && entry.next_visible_at <= cutoff {
                entry.next_visible_at = now;
                entry.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get(&self, job_id: Uuid) -> Result<JobRecord, QueueError> {
        let jobs = self.jobs.read();
        let entry = jobs.get(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        Ok(JobRecord {
            id: job_id,
            job_type: entry.job_type.clone(),
            payload: entry.payload.clone(),
            state: entry.state,
            attempts: entry.attempts,
            max_attempts: entry.max_attempts,
            next_visible_at: entry.next_visible_at,
            last_error: entry.last_error.clone(),
            result: entry.result.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    async fn count_in_state(
        &self,
        job_type: &str,
        state: JobState,
    ) -> Result<u64, QueueError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.job_type == job_type && j.state == state)
            .count() as u64)
    }
}
