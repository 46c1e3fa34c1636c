//! ocr_to_database: register the transcript as a document row
//!
//! Terminal step of the ingestion chain; the chain is empty afterwards so
//! fan-out submits nothing.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use scribe_core::envelope::WorkflowEnvelope;
use scribe_core::hash::content_hash;
use scribe_durable::{chain, HandlerError, HandlerResult, JobContext};
use scribe_storage::{CompleteOutcome, CreateDocument, StartOutcome};

use super::HandlerDeps;
use crate::workflow::{STEP_OCR_TO_DATABASE, WORKFLOW_VISION_PDF_OCR};

#[derive(Debug, Deserialize)]
struct OcrToDatabasePayload {
    text_path: String,
    page: i64,
    dossier_id: String,
    owner_id: String,
}

pub async fn ocr_to_database(deps: HandlerDeps, ctx: JobContext, payload: Value) -> HandlerResult {
    if ctx.is_cancelled() {
        return Err(HandlerError::transient("worker shutting down"));
    }

    let parsed: OcrToDatabasePayload = serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::permanent(format!("malformed payload: {e}")))?;
    let envelope = WorkflowEnvelope::from_payload(&payload)
        .ok_or_else(|| HandlerError::permanent("payload missing workflow envelope"))?;

    let text_bytes = tokio::fs::read(&parsed.text_path)
        .await
        .map_err(|e| HandlerError::transient(format!("read {}: {e}", parsed.text_path)))?;
    let input_hash = content_hash(&text_bytes);

    let outcome = deps
        .trace
        .start(
            WORKFLOW_VISION_PDF_OCR,
            &envelope.run_id,
            STEP_OCR_TO_DATABASE,
            &input_hash,
            &json!({"text_path": parsed.text_path, "page": parsed.page}),
        )
        .await
        .map_err(HandlerError::transient)?;

    let (document_id, replayed) = match outcome {
        StartOutcome::Duplicate { trace_id } => {
            let prior = deps.trace.load(trace_id).await.map_err(HandlerError::transient)?;
            let metadata = prior.step_metadata().map_err(HandlerError::transient)?;
            let document_id = metadata
                .get("document_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            (document_id, true)
        }
        StartOutcome::Fresh { trace_id } => {
            let result = deps
                .db
                .create_document(CreateDocument {
                    dossier_id: parsed.dossier_id.clone(),
                    owner_id: parsed.owner_id.clone(),
                    run_id: envelope.run_id.clone(),
                    page: parsed.page,
                    text_path: parsed.text_path.clone(),
                })
                .await;

            match result {
                Ok(document) => {
                    let outcome = deps
                        .trace
                        .complete(
                            trace_id,
                            None,
                            &[],
                            &json!({"document_id": document.id, "page": parsed.page}),
                        )
                        .await
                        .map_err(HandlerError::transient)?;
                    if let CompleteOutcome::LostRace { existing_trace_id } = outcome {
                        info!(%existing_trace_id, "Concurrent run recorded this step first");
                    }
                    info!(
                        document_id = %document.id,
                        page = parsed.page,
                        run_id = %envelope.run_id,
                        "Document registered"
                    );
                    (document.id, false)
                }
                Err(e) => {
                    deps.trace
                        .fail(trace_id, "document_insert_failed", &e.to_string())
                        .await
                        .ok();
                    return Err(HandlerError::transient(e));
                }
            }
        }
    };

    // Terminal step: the chain is empty here, so this is a no-op unless a
    // longer chain was configured upstream
    chain::spawn_successors(&*ctx.queue, &payload, vec![])
        .await
        .map_err(HandlerError::transient)?;

    Ok(json!({
        "document_id": document_id,
        "replayed": replayed,
    }))
}
