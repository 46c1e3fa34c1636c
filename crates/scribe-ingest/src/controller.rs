//! Ingest controller
//!
//! Glues a completed upload to the workflow chain: infers the content kind,
//! resolves dossier ownership, and submits the root job. Deduplicated
//! completions return the prior ingest without resubmitting.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use scribe_core::{Caller, Error, Result};
use scribe_durable::{chain, JobStore};
use scribe_storage::{CreateDossier, Database, DossierRow, ObservabilityStore};

use crate::upload::CompletedUpload;
use crate::workflow::ContentKind;

/// What the client gets back when the final PATCH lands
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub upload_id: String,
    pub dossier_id: String,
    pub content_hash: String,
    pub deduplicated: bool,
    /// Workflow run processing this content (the prior run on a dedup hit)
    pub run_id: Option<String>,
    /// Root job submitted for this ingest, absent on dedup
    pub job_id: Option<Uuid>,
}

/// Submits workflow roots for completed uploads.
#[derive(Clone)]
pub struct IngestController {
    db: Database,
    queue: Arc<dyn JobStore>,
    observability: ObservabilityStore,
}

impl IngestController {
    pub fn new(db: Database, queue: Arc<dyn JobStore>, observability: ObservabilityStore) -> Self {
        Self {
            db,
            queue,
            observability,
        }
    }

    /// Resolve the dossier an ingest lands in.
    ///
    /// Precedence: explicit request id, then the id supplied by the caller's
    /// claim, then a freshly minted opaque id. Explicit ids must exist and
    /// belong to the caller; claim-supplied and minted ids are created on
    /// first use. Ids are never derived from the owner identity.
    pub async fn resolve_dossier(
        &self,
        caller: &Caller,
        explicit: Option<&str>,
        claim_supplied: Option<&str>,
    ) -> Result<DossierRow> {
        if let Some(id) = explicit {
            let dossier = self
                .db
                .get_dossier(id)
                .await?
                .ok_or_else(|| Error::not_found(format!("dossier {id}")))?;
            caller.check_owner(&dossier.owner_id)?;
            return Ok(dossier);
        }

        if let Some(id) = claim_supplied {
            if let Some(dossier) = self.db.get_dossier(id).await? {
                caller.check_owner(&dossier.owner_id)?;
                return Ok(dossier);
            }
            return self
                .db
                .create_dossier(CreateDossier {
                    id: id.to_string(),
                    owner_id: caller.owner_id.clone(),
                    title: None,
                })
                .await;
        }

        self.db
            .create_dossier(CreateDossier {
                id: scribe_core::mint_id(),
                owner_id: caller.owner_id.clone(),
                title: None,
            })
            .await
    }

    /// Submit the workflow root for a completed upload.
    pub async fn ingest_completed(
        &self,
        caller: &Caller,
        completed: &CompletedUpload,
    ) -> Result<IngestReceipt> {
        if completed.deduplicated {
            // The content was already ingested for this owner; report the
            // prior run instead of re-running the chain.
            return Ok(IngestReceipt {
                upload_id: completed.upload.id.clone(),
                dossier_id: completed.upload.dossier_id.clone(),
                content_hash: completed.content_hash.clone(),
                deduplicated: true,
                run_id: completed.prior_run_id.clone(),
                job_id: None,
            });
        }

        let head = read_head(&completed.blob_path).await?;
        let kind = ContentKind::sniff(&head)?;
        let (root_type, chain_steps) = kind.workflow_entry();

        let payload = json!({
            "source_path": completed.blob_path,
            "dossier_id": completed.upload.dossier_id,
            "owner_id": caller.owner_id,
            "original_token": caller.original_token,
            "content_hash": completed.content_hash,
        });

        let (job_id, run_id) =
            chain::submit_root(&*self.queue, root_type, payload, chain_steps)
                .await
                .map_err(|e| Error::storage(e.to_string()))?;

        self.db
            .set_blob_run(&caller.owner_id, &completed.content_hash, &run_id)
            .await?;

        if let Err(e) = self
            .observability
            .record_event(
                "ingest",
                "workflow_submitted",
                &format!("run {run_id} for upload {}", completed.upload.id),
            )
            .await
        {
            // Audit is best-effort; the ingest itself already happened
            tracing::warn!("Audit write failed: {}", e);
        }

        info!(
            upload_id = %completed.upload.id,
            run_id = %run_id,
            root_type,
            "Ingest workflow submitted"
        );

        Ok(IngestReceipt {
            upload_id: completed.upload.id.clone(),
            dossier_id: completed.upload.dossier_id.clone(),
            content_hash: completed.content_hash.clone(),
            deduplicated: false,
            run_id: Some(run_id),
            job_id: Some(job_id),
        })
    }
}

async fn read_head(path: &str) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::storage(format!("open blob: {e}")))?;
    let mut head = vec![0u8; 16];
    let n = file
        .read(&mut head)
        .await
        .map_err(|e| Error::storage(format!("read blob: {e}")))?;
    head.truncate(n);
    Ok(head)
}
