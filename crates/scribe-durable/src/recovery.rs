//! Boot-time recovery
//!
//! Runs once before the worker starts dispatchers. Jobs left `running` by a
//! previous process are made claimable again, as are `retrying` rows whose
//! visibility is overdue past a threshold (clock skew, long downtime).

use std::time::Duration;

use tracing::info;

use crate::queue::{JobStore, QueueError};

/// How overdue a `retrying` row must be before recovery touches it
pub const DEFAULT_OVERDUE_THRESHOLD: Duration = Duration::from_secs(300);

/// Counts of rows recovered at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `running` rows reset to `retrying`
    pub stale_running: usize,
    /// Overdue `retrying` rows made visible now
    pub overdue_retrying: usize,
}

/// Reset intermediate-state rows so the fresh worker can claim them.
pub async fn recover_at_boot(
    store: &dyn JobStore,
    overdue_threshold: Duration,
) -> Result<RecoveryReport, QueueError> {
    let stale_running = store.recover_stale().await?;
    let overdue_retrying = store.requeue_overdue(overdue_threshold).await?;

    if stale_running > 0 || overdue_retrying > 0 {
        info!(
            stale_running,
            overdue_retrying, "Recovered interrupted jobs at boot"
        );
    }
    Ok(RecoveryReport {
        stale_running,
        overdue_retrying,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobStore, JobState, JobStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_recovery_resets_running_rows() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.submit("t", json!({})).await.unwrap();
        }
        store.claim("t", 2).await.unwrap();

        let report = recover_at_boot(&store, DEFAULT_OVERDUE_THRESHOLD)
            .await
            .unwrap();
        assert_eq!(report.stale_running, 2);
        assert_eq!(store.count_in_state("t", JobState::Running).await.unwrap(), 0);

        // Everything is claimable again
        assert_eq!(store.claim("t", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_recovery_requeues_overdue_retrying() {
        let store = InMemoryJobStore::new();
        let id = store.submit("t", json!({})).await.unwrap();
        store.claim("t", 1).await.unwrap();
        store
            .fail_transient(id, "err", Duration::ZERO)
            .await
            .unwrap();

        // Visible since roughly now: overdue under a zero threshold
        let report = recover_at_boot(&store, Duration::ZERO).await.unwrap();
        assert_eq!(report.overdue_retrying, 1);
        assert_eq!(store.claim("t", 1).await.unwrap().len(), 1);
    }
}
