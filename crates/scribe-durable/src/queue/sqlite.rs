//! SQLite implementation of JobStore
//!
//! The store relies on a single-writer pool: one connection, so every
//! statement is serialized and each claim is atomic without row locks. When
//! the jobs table is co-located with other tables in one database file, the
//! file's one pool must be shared via `with_pool`; a second independent pool
//! on the same file would mean two writers contending for the WAL lock. The
//! claim statement selects and flips rows in one UPDATE so other callers
//! never observe an intermediate state.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::error;
use uuid::Uuid;

use super::store::{
    ClaimedJob, FailureOutcome, JobRecord, JobState, JobStore, QueueError,
};

/// Default retry budget for submitted jobs
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// SQLite-backed job queue
pub struct SqliteJobStore {
    pool: SqlitePool,
    default_max_attempts: u32,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    payload: String,
    state: String,
    attempts: i64,
    max_attempts: i64,
    next_visible_at: DateTime<Utc>,
    last_error: Option<String>,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord, QueueError> {
        Ok(JobRecord {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| QueueError::Serialization(e.to_string()))?,
            job_type: self.job_type,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| QueueError::Serialization(e.to_string()))?,
            state: self
                .state
                .parse()
                .map_err(QueueError::Serialization)?,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            next_visible_at: self.next_visible_at,
            last_error: self.last_error,
            result: self
                .result
                .map(|r| serde_json::from_str(&r))
                .transpose()
                .map_err(|e| QueueError::Serialization(e.to_string()))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl SqliteJobStore {
    /// Open (or create) a dedicated queue database at `url` and initialize
    /// its schema. For a jobs table co-located with other stores, share the
    /// file's pool through `with_pool` instead.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| QueueError::Database(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // Single writer connection keeps claims serialized and avoids
        // SQLITE_BUSY storms under concurrent dispatchers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| QueueError::Database(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Build the store on an existing pool and initialize its schema.
    ///
    /// This is how the queue joins a database file that other stores also
    /// write: one shared pool keeps the file at exactly one writer.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, QueueError> {
        let store = Self {
            pool,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Override the retry budget applied to newly submitted jobs.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                next_visible_at TEXT NOT NULL,
                last_error TEXT,
                result TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim
             ON jobs (job_type, state, next_visible_at, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(())
    }

    async fn fetch_record(&self, job_id: Uuid) -> Result<JobRecord, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, job_type, payload, state, attempts, max_attempts,
                   next_visible_at, last_error, result, created_at, updated_at
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?
        .ok_or(QueueError::JobNotFound(job_id))?;

        row.into_record()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let payload_text = serde_json::to_string(&payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, state, attempts, max_attempts,
                              next_visible_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?5, ?5)
            "#,
        )
        .bind(id.to_string())
        .bind(job_type)
        .bind(&payload_text)
        .bind(self.default_max_attempts as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn claim(&self, job_type: &str, limit: usize) -> Result<Vec<ClaimedJob>, QueueError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let now = Utc::now();

        // Select and flip in one statement:
        // 1. Finds pending rows, or retrying rows whose visibility has passed
        // 2. Orders oldest created_at first
        // 3. Flips state and increments attempts atomically
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'running', attempts = attempts + 1, updated_at = ?3
            WHERE id IN (
                SELECT id FROM jobs
                WHERE job_type = ?1
                  AND (state = 'pending'
                       OR (state = 'retrying' AND next_visible_at <= ?3))
                ORDER BY created_at ASC
                LIMIT ?2
            )
            RETURNING id, job_type, payload, attempts, max_attempts
            "#,
        )
        .bind(job_type)
        .bind(limit as i64)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim jobs: {}", e);
            QueueError::Database(e.to_string())
        })?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let payload: String = row.get("payload");
            claimed.push(ClaimedJob {
                id: Uuid::parse_str(&id)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?,
                job_type: row.get("job_type"),
                payload: serde_json::from_str(&payload)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?,
                attempts: row.get::<i64, _>("attempts") as u32,
                max_attempts: row.get::<i64, _>("max_attempts") as u32,
            });
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), QueueError> {
        let result_text = serde_json::to_string(&result)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let res = sqlx::query(
            "UPDATE jobs SET state = 'done', result = ?2, updated_at = ?3
             WHERE id = ?1 AND state = 'running'",
        )
        .bind(job_id.to_string())
        .bind(&result_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        if res.rows_affected() == 0 {
            let record = self.fetch_record(job_id).await?;
            if record.state == JobState::Done {
                // Second complete on done is a no-op
                return Ok(());
            }
            return Err(QueueError::InvalidTransition {
                job_id,
                from: record.state,
                to: JobState::Done,
            });
        }
        Ok(())
    }

    async fn fail_transient(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> Result<FailureOutcome, QueueError> {
        let now = Utc::now();
        let visible_at = now
            + chrono::Duration::from_std(backoff)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = CASE WHEN attempts < max_attempts THEN 'retrying' ELSE 'failed' END,
                next_visible_at = CASE WHEN attempts < max_attempts THEN ?3 ELSE next_visible_at END,
                last_error = ?2,
                updated_at = ?4
            WHERE id = ?1 AND state = 'running'
            RETURNING state, attempts
            "#,
        )
        .bind(job_id.to_string())
        .bind(error)
        .bind(visible_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        match row {
            Some(row) => {
                let state: String = row.get("state");
                if state == "retrying" {
                    Ok(FailureOutcome::WillRetry {
                        next_attempt: row.get::<i64, _>("attempts") as u32 + 1,
                        delay: backoff,
                    })
                } else {
                    Ok(FailureOutcome::ExhaustedRetries)
                }
            }
            None => {
                let record = self.fetch_record(job_id).await?;
                Err(QueueError::InvalidTransition {
                    job_id,
                    from: record.state,
                    to: JobState::Retrying,
                })
            }
        }
    }

    async fn fail_permanent(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let res = sqlx::query(
            "UPDATE jobs SET state = 'failed', last_error = ?2, updated_at = ?3
             WHERE id = ?1 AND state NOT IN ('done', 'failed')",
        )
        .bind(job_id.to_string())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        if res.rows_affected() == 0 {
            let record = self.fetch_record(job_id).await?;
            if record.state == JobState::Failed {
                return Ok(());
            }
            return Err(QueueError::InvalidTransition {
                job_id,
                from: record.state,
                to: JobState::Failed,
            });
        }
        Ok(())
    }

    async fn recover_stale(&self) -> Result<usize, QueueError> {
        let res = sqlx::query(
            "UPDATE jobs SET state = 'retrying', next_visible_at = ?1, updated_at = ?1
             WHERE state = 'running'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(res.rows_affected() as usize)
    }

    async fn requeue_overdue(&self, older_than: Duration) -> Result<usize, QueueError> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let res = sqlx::query(
            "UPDATE jobs SET next_visible_at = ?2, updated_at = ?2
             WHERE state = 'retrying' AND next_visible_at <= ?1",
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(res.rows_affected() as usize)
    }

    async fn get(&self, job_id: Uuid) -> Result<JobRecord, QueueError> {
        self.fetch_record(job_id).await
    }

    async fn count_in_state(
        &self,
        job_type: &str,
        state: JobState,
    ) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE job_type = ?1 AND state = ?2",
        )
        .bind(job_type)
        .bind(state.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(count as u64)
    }
}
