//! Content-addressed step trace
//!
//! Every non-trivial workflow step records a trace row keyed on
//! `(workflow_name, step_name, input_hash)`. A `complete` row under that key
//! is the idempotence marker: a later run of the same step over the same
//! input short-circuits and replays the recorded artifacts instead of
//! re-executing. The trace lives in its own SQLite file so step bookkeeping
//! never contends with the job queue.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use scribe_core::{Error, Result};

use crate::db::open_pool;

/// Trace entry states
pub const STATE_RUNNING: &str = "running";
pub const STATE_COMPLETE: &str = "complete";
pub const STATE_FAILED: &str = "failed";

/// One step execution record
#[derive(Debug, Clone, FromRow)]
pub struct TraceRow {
    pub trace_id: String,
    pub workflow_name: String,
    pub run_id: String,
    pub step_name: String,
    pub input_hash: String,
    pub state: String,
    pub output_path: Option<String>,
    /// JSON array of artifact paths, ordered
    pub artifact_paths: String,
    /// JSON object of step metadata
    pub step_metadata: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
}

impl TraceRow {
    pub fn artifact_paths(&self) -> Result<Vec<String>> {
        serde_json::from_str(&self.artifact_paths)
            .map_err(|e| Error::storage(format!("corrupt artifact_paths: {e}")))
    }

    pub fn step_metadata(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.step_metadata)
            .map_err(|e| Error::storage(format!("corrupt step_metadata: {e}")))
    }
}

/// Outcome of `start`
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// New running row; the caller must do the work and then call
    /// `complete` or `fail`
    Fresh { trace_id: Uuid },

    /// A complete row already exists for this idempotence key; the caller
    /// must not repeat the work and should replay from `load`
    Duplicate { trace_id: Uuid },
}

/// Outcome of `complete`
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    /// This row is now the complete record for its key
    Recorded,

    /// Another handler completed the same key first; this row was marked
    /// failed and the winner's trace id is returned for replay
    LostRace { existing_trace_id: Uuid },
}

/// Store for step trace entries, on its own database file.
#[derive(Clone)]
pub struct TraceStore {
    pool: SqlitePool,
}

impl TraceStore {
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trace_entries (
                trace_id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                run_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                state TEXT NOT NULL,
                output_path TEXT,
                artifact_paths TEXT NOT NULL DEFAULT '[]',
                step_metadata TEXT NOT NULL DEFAULT '{}',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error_code TEXT,
                error_detail TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        // The idempotence key: at most one complete row per
        // (workflow, step, input). Running and failed rows do not block
        // retries, so the index is partial.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_trace_idempotence
            ON trace_entries (workflow_name, step_name, input_hash)
            WHERE state = 'complete'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trace_run ON trace_entries (run_id, started_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    /// Begin a step, or detect that it already ran to completion.
    pub async fn start(
        &self,
        workflow_name: &str,
        run_id: &str,
        step_name: &str,
        input_hash: &str,
        metadata: &serde_json::Value,
    ) -> Result<StartOutcome> {
        if let Some(existing) = self
            .lookup_complete(workflow_name, step_name, input_hash)
            .await?
        {
            return Ok(StartOutcome::Duplicate {
                trace_id: parse_trace_id(&existing.trace_id)?,
            });
        }

        let trace_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO trace_entries
                (trace_id, workflow_name, run_id, step_name, input_hash, state,
                 step_metadata, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6, ?7)
            "#,
        )
        .bind(trace_id.to_string())
        .bind(workflow_name)
        .bind(run_id)
        .bind(step_name)
        .bind(input_hash)
        .bind(metadata.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(StartOutcome::Fresh { trace_id })
    }

    /// running -> complete. A complete row for the key is never overwritten:
    /// losing the completion race marks this row failed instead.
    pub async fn complete(
        &self,
        trace_id: Uuid,
        output_path: Option<&str>,
        artifact_paths: &[String],
        metadata: &serde_json::Value,
    ) -> Result<CompleteOutcome> {
        let artifacts_json = serde_json::to_string(artifact_paths)
            .map_err(|e| Error::storage(e.to_string()))?;

        let res = sqlx::query(
            r#"
            UPDATE trace_entries
            SET state = 'complete', output_path = ?2, artifact_paths = ?3,
                step_metadata = ?4, finished_at = ?5
            WHERE trace_id = ?1 AND state = 'running'
            "#,
        )
        .bind(trace_id.to_string())
        .bind(output_path)
        .bind(&artifacts_json)
        .bind(metadata.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => {
                if done.rows_affected() == 0 {
                    return Err(Error::storage(format!(
                        "trace {trace_id} not in running state"
                    )));
                }
                Ok(CompleteOutcome::Recorded)
            }
            Err(e) if is_unique_violation(&e) => {
                // A concurrent handler won the race for this key. Park this
                // row as failed and point the caller at the winner.
                let row = self.load(trace_id).await?;
                self.fail(trace_id, "duplicate", "lost completion race")
                    .await?;
                let winner = self
                    .lookup_complete(&row.workflow_name, &row.step_name, &row.input_hash)
                    .await?
                    .ok_or_else(|| Error::storage("winning trace row vanished"))?;
                Ok(CompleteOutcome::LostRace {
                    existing_trace_id: parse_trace_id(&winner.trace_id)?,
                })
            }
            Err(e) => Err(Error::storage(e.to_string())),
        }
    }

    /// running -> failed. Failed rows are invisible to lookups, so the step
    /// is retried on the next attempt.
    pub async fn fail(
        &self,
        trace_id: Uuid,
        error_code: &str,
        error_detail: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trace_entries
            SET state = 'failed', error_code = ?2, error_detail = ?3, finished_at = ?4
            WHERE trace_id = ?1 AND state = 'running'
            "#,
        )
        .bind(trace_id.to_string())
        .bind(error_code)
        .bind(error_detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    /// Load a trace row (for replay of artifacts and metadata).
    pub async fn load(&self, trace_id: Uuid) -> Result<TraceRow> {
        sqlx::query_as::<_, TraceRow>(
            r#"
            SELECT trace_id, workflow_name, run_id, step_name, input_hash, state,
                   output_path, artifact_paths, step_metadata, started_at,
                   finished_at, error_code, error_detail
            FROM trace_entries
            WHERE trace_id = ?1
            "#,
        )
        .bind(trace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?
        .ok_or_else(|| Error::not_found(format!("trace {trace_id}")))
    }

    /// All entries of one workflow run, oldest first.
    pub async fn list_run(&self, run_id: &str) -> Result<Vec<TraceRow>> {
        sqlx::query_as::<_, TraceRow>(
            r#"
            SELECT trace_id, workflow_name, run_id, step_name, input_hash, state,
                   output_path, artifact_paths, step_metadata, started_at,
                   finished_at, error_code, error_detail
            FROM trace_entries
            WHERE run_id = ?1
            ORDER BY started_at ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))
    }

    async fn lookup_complete(
        &self,
        workflow_name: &str,
        step_name: &str,
        input_hash: &str,
    ) -> Result<Option<TraceRow>> {
        sqlx::query_as::<_, TraceRow>(
            r#"
            SELECT trace_id, workflow_name, run_id, step_name, input_hash, state,
                   output_path, artifact_paths, step_metadata, started_at,
                   finished_at, error_code, error_detail
            FROM trace_entries
            WHERE workflow_name = ?1 AND step_name = ?2 AND input_hash = ?3
              AND state = 'complete'
            "#,
        )
        .bind(workflow_name)
        .bind(step_name)
        .bind(input_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))
    }
}

fn parse_trace_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::storage(format!("corrupt trace id: {e}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> TraceStore {
        TraceStore::from_url("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_then_duplicate() {
        let store = store().await;

        let outcome = store
            .start("vision_pdf_ocr", "run-1", "pdf_to_images", "hash-a", &json!({}))
            .await
            .unwrap();
        let StartOutcome::Fresh { trace_id } = outcome else {
            panic!("expected fresh start");
        };

        store
            .complete(
                trace_id,
                Some("/t/out"),
                &["/t/p1.png".into(), "/t/p2.png".into()],
                &json!({"pages": 2}),
            )
            .await
            .unwrap();

        // Same key again, different run: short-circuits
        let outcome = store
            .start("vision_pdf_ocr", "run-2", "pdf_to_images", "hash-a", &json!({}))
            .await
            .unwrap();
        let StartOutcome::Duplicate { trace_id: dup } = outcome else {
            panic!("expected duplicate");
        };
        assert_eq!(dup, trace_id);

        let row = store.load(dup).await.unwrap();
        assert_eq!(row.artifact_paths().unwrap(), vec!["/t/p1.png", "/t/p2.png"]);
        assert_eq!(row.step_metadata().unwrap()["pages"], 2);
    }

    #[tokio::test]
    async fn test_failed_rows_do_not_short_circuit() {
        let store = store().await;

        let StartOutcome::Fresh { trace_id } = store
            .start("wf", "run-1", "step", "h", &json!({}))
            .await
            .unwrap()
        else {
            panic!("expected fresh");
        };
        store.fail(trace_id, "ocr_unreachable", "503").await.unwrap();

        // Work is retried: the failed row is ignored
        let outcome = store
            .start("wf", "run-1", "step", "h", &json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Fresh { .. }));
    }

    #[tokio::test]
    async fn test_key_differs_by_input_hash() {
        let store = store().await;

        let StartOutcome::Fresh { trace_id } =
            store.start("wf", "r", "step", "h1", &json!({})).await.unwrap()
        else {
            panic!("expected fresh");
        };
        store.complete(trace_id, None, &[], &json!({})).await.unwrap();

        let outcome = store.start("wf", "r", "step", "h2", &json!({})).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Fresh { .. }));
    }

    #[tokio::test]
    async fn test_completion_race_loser_replays_winner() {
        let store = store().await;

        // Two handlers start the same key concurrently: both get fresh rows
        let StartOutcome::Fresh { trace_id: a } =
            store.start("wf", "r1", "step", "h", &json!({})).await.unwrap()
        else {
            panic!("expected fresh");
        };
        let StartOutcome::Fresh { trace_id: b } =
            store.start("wf", "r2", "step", "h", &json!({})).await.unwrap()
        else {
            panic!("expected fresh");
        };

        let first = store
            .complete(a, None, &["/t/x".into()], &json!({}))
            .await
            .unwrap();
        assert!(matches!(first, CompleteOutcome::Recorded));

        let second = store
            .complete(b, None, &["/t/y".into()], &json!({}))
            .await
            .unwrap();
        let CompleteOutcome::LostRace { existing_trace_id } = second else {
            panic!("expected lost race");
        };
        assert_eq!(existing_trace_id, a);

        // The loser's row is parked as failed, the winner's artifacts stand
        assert_eq!(store.load(b).await.unwrap().state, STATE_FAILED);
        assert_eq!(
            store.load(a).await.unwrap().artifact_paths().unwrap(),
            vec!["/t/x"]
        );
    }

    #[tokio::test]
    async fn test_list_run_orders_by_start() {
        let store = store().await;
        for (step, hash) in [("a", "h1"), ("b", "h2")] {
            let StartOutcome::Fresh { trace_id } =
                store.start("wf", "run-x", step, hash, &json!({})).await.unwrap()
            else {
                panic!("expected fresh");
            };
            store.complete(trace_id, None, &[], &json!({})).await.unwrap();
        }

        let rows = store.list_run("run-x").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].step_name, "a");
        assert_eq!(rows[1].step_name, "b");
    }
}
