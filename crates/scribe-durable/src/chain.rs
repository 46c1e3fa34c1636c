//! Workflow chain fan-out
//!
//! A handler that produced artifacts peels the head off the `_workflow`
//! chain in its payload and submits one successor job per artifact, all
//! carrying the chain tail and the parent's run id. Fan-out children run
//! independently; there is no implicit join.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use scribe_core::envelope::{carry_over, WorkflowEnvelope};

use crate::queue::{JobStore, QueueError};

/// Submit a workflow root job.
///
/// Ensures the payload carries a `_workflow` envelope with `chain` and a
/// non-empty `run_id`: an existing run id is preserved, an absent or empty
/// one is minted here. Returns the job id and the run id in effect.
pub async fn submit_root(
    store: &dyn JobStore,
    job_type: &str,
    mut payload: Value,
    chain: Vec<String>,
) -> Result<(Uuid, String), QueueError> {
    let envelope = match WorkflowEnvelope::from_payload(&payload) {
        Some(env) if !env.run_id.is_empty() => env,
        _ => WorkflowEnvelope::root(chain),
    };
    let run_id = envelope.run_id.clone();
    envelope.embed(&mut payload);

    let job_id = store.submit(job_type, payload).await?;
    debug!(%job_id, run_id = %run_id, job_type, "Workflow root submitted");
    Ok((job_id, run_id))
}

/// Spawn successor jobs for each produced artifact.
///
/// `artifacts` are the step-specific payload bodies (objects); each gets the
/// chain tail embedded plus the parent's opaque correlation fields copied
/// verbatim. An empty or missing chain terminates the workflow at this
/// branch and returns no ids.
pub async fn spawn_successors(
    store: &dyn JobStore,
    parent_payload: &Value,
    artifacts: Vec<Value>,
) -> Result<Vec<Uuid>, QueueError> {
    let Some(envelope) = WorkflowEnvelope::from_payload(parent_payload) else {
        return Ok(vec![]);
    };
    let Some((next_type, tail)) = envelope.peel() else {
        debug!(run_id = %envelope.run_id, "Chain exhausted, workflow branch terminates");
        return Ok(vec![]);
    };

    let mut ids = Vec::with_capacity(artifacts.len());
    for mut child in artifacts {
        tail.embed(&mut child);
        carry_over(parent_payload, &mut child);
        ids.push(store.submit(&next_type, child).await?);
    }

    debug!(
        run_id = %envelope.run_id,
        next_type = %next_type,
        count = ids.len(),
        "Spawned successor jobs"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobStore, JobStore as _};
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_root_mints_run_id_when_blank() {
        let store = InMemoryJobStore::new();
        let payload = json!({
            "pdf_path": "/t/a.pdf",
            "_workflow": {"chain": ["image_to_ocr"], "run_id": ""}
        });

        let (job_id, run_id) = submit_root(
            &store,
            "pdf_to_images",
            payload,
            vec!["image_to_ocr".into()],
        )
        .await
        .unwrap();

        assert!(!run_id.is_empty());
        let record = store.get(job_id).await.unwrap();
        let env = WorkflowEnvelope::from_payload(&record.payload).unwrap();
        assert_eq!(env.run_id, run_id);
        assert_eq!(env.chain, vec!["image_to_ocr"]);
    }

    #[tokio::test]
    async fn test_submit_root_preserves_existing_run_id() {
        let store = InMemoryJobStore::new();
        let payload = json!({
            "_workflow": {"chain": ["b"], "run_id": "run-keep"}
        });

        let (_, run_id) = submit_root(&store, "a", payload, vec!["b".into()]).await.unwrap();
        assert_eq!(run_id, "run-keep");
    }

    #[tokio::test]
    async fn test_fan_out_shares_run_id_and_shrinks_chain() {
        let store = InMemoryJobStore::new();
        let parent = json!({
            "pdf_path": "/t/a.pdf",
            "envelope_id": "env-42",
            "_workflow": {"chain": ["image_to_ocr", "ocr_to_database"], "run_id": "run-7"}
        });

        let artifacts = vec![
            json!({"image_path": "/t/p1.png"}),
            json!({"image_path": "/t/p2.png"}),
            json!({"image_path": "/t/p3.png"}),
        ];
        let ids = spawn_successors(&store, &parent, artifacts).await.unwrap();
        assert_eq!(ids.len(), 3);

        for id in ids {
            let record = store.get(id).await.unwrap();
            assert_eq!(record.job_type, "image_to_ocr");
            let env = WorkflowEnvelope::from_payload(&record.payload).unwrap();
            assert_eq!(env.run_id, "run-7");
            assert_eq!(env.chain, vec!["ocr_to_database"]);
            // Correlation fields ride along verbatim
            assert_eq!(record.payload["envelope_id"], "env-42");
        }
    }

    #[tokio::test]
    async fn test_empty_chain_terminates_branch() {
        let store = InMemoryJobStore::new();
        let parent = json!({
            "_workflow": {"chain": [], "run_id": "run-9"}
        });

        let ids = spawn_successors(&store, &parent, vec![json!({"x": 1})])
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_envelope_spawns_nothing() {
        let store = InMemoryJobStore::new();
        let ids = spawn_successors(&store, &json!({"a": 1}), vec![json!({})])
            .await
            .unwrap();
        assert!(ids.is_empty());
    }
}
