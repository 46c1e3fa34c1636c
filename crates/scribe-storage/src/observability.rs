//! Observability datastore: heartbeats and audit events
//!
//! Separate file from the main datastore so liveness writes never contend
//! with ingest traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use scribe_core::{Error, Result};

use crate::db::open_pool;

/// Default heartbeat cadence
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Latest liveness row for a service
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HeartbeatRow {
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub alive: bool,
    /// JSON object snapshot of runtime counters
    pub runtime_snapshot: String,
}

/// Verdict derived from a heartbeat row's age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Alive,
    Degraded,
}

/// Audit event row
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEventRow {
    pub id: String,
    pub service: String,
    pub kind: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Store for heartbeats and audit events.
#[derive(Clone)]
pub struct ObservabilityStore {
    pool: SqlitePool,
}

impl ObservabilityStore {
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS heartbeats (
                service_name TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                alive INTEGER NOT NULL,
                runtime_snapshot TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                service TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_events (created_at)",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Upsert the liveness row for `service`.
    pub async fn beat(&self, service: &str, snapshot: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (service_name, timestamp, alive, runtime_snapshot)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT (service_name) DO UPDATE
            SET timestamp = excluded.timestamp,
                alive = excluded.alive,
                runtime_snapshot = excluded.runtime_snapshot
            "#,
        )
        .bind(service)
        .bind(Utc::now())
        .bind(snapshot.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    pub async fn read_heartbeat(&self, service: &str) -> Result<Option<HeartbeatRow>> {
        sqlx::query_as::<_, HeartbeatRow>(
            "SELECT service_name, timestamp, alive, runtime_snapshot
             FROM heartbeats WHERE service_name = ?1",
        )
        .bind(service)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))
    }

    /// Degraded when the row is missing or older than 3x the interval.
    pub async fn health(&self, service: &str, interval: Duration) -> Result<HealthStatus> {
        let Some(row) = self.read_heartbeat(service).await? else {
            return Ok(HealthStatus::Degraded);
        };
        let age = Utc::now().signed_duration_since(row.timestamp);
        let limit = chrono::Duration::from_std(interval * 3)
            .unwrap_or_else(|_| chrono::Duration::seconds(45));

        if row.alive && age <= limit {
            Ok(HealthStatus::Alive)
        } else {
            Ok(HealthStatus::Degraded)
        }
    }

    /// Append an audit event.
    pub async fn record_event(&self, service: &str, kind: &str, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_events (id, service, kind, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(scribe_core::mint_id())
        .bind(service)
        .bind(kind)
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<AuditEventRow>> {
        sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, service, kind, detail, created_at
             FROM audit_events ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))
    }
}

/// Producer of runtime snapshots for the heartbeat writer
pub type SnapshotFn = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Spawn the heartbeat writer loop.
///
/// Persists a liveness row every `interval` until the shutdown signal flips;
/// write failures are logged and the loop keeps going.
pub fn spawn_heartbeat_writer(
    store: ObservabilityStore,
    service: String,
    interval: Duration,
    snapshot: SnapshotFn,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.beat(&service, &snapshot()).await {
                        error!(service = %service, "Heartbeat write failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!(service = %service, "Heartbeat writer shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> ObservabilityStore {
        ObservabilityStore::from_url("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_heartbeat_is_degraded() {
        let store = store().await;
        assert_eq!(
            store.health("worker", Duration::from_secs(15)).await.unwrap(),
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_is_alive() {
        let store = store().await;
        store.beat("worker", &json!({"in_flight": 2})).await.unwrap();

        assert_eq!(
            store.health("worker", Duration::from_secs(15)).await.unwrap(),
            HealthStatus::Alive
        );

        let row = store.read_heartbeat("worker").await.unwrap().unwrap();
        assert!(row.alive);
        assert!(row.runtime_snapshot.contains("in_flight"));
    }

    #[tokio::test]
    async fn test_stale_heartbeat_is_degraded() {
        let store = store().await;
        store.beat("worker", &json!({})).await.unwrap();

        // With a zero interval the 3x staleness window is zero too
        assert_eq!(
            store.health("worker", Duration::ZERO).await.unwrap(),
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_beat_upserts_single_row() {
        let store = store().await;
        store.beat("api", &json!({"n": 1})).await.unwrap();
        store.beat("api", &json!({"n": 2})).await.unwrap();

        let row = store.read_heartbeat("api").await.unwrap().unwrap();
        assert!(row.runtime_snapshot.contains("2"));
    }

    #[tokio::test]
    async fn test_audit_events_recent_first() {
        let store = store().await;
        store.record_event("ingest", "upload_completed", "u1").await.unwrap();
        store.record_event("ingest", "workflow_submitted", "r1").await.unwrap();

        let events = store.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
