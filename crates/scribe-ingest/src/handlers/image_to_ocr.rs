//! image_to_ocr: recognize text in one page image

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use scribe_core::envelope::WorkflowEnvelope;
use scribe_core::hash::content_hash;
use scribe_durable::{chain, HandlerError, HandlerResult, JobContext};
use scribe_storage::{CompleteOutcome, StartOutcome};

use super::HandlerDeps;
use crate::workflow::{STEP_IMAGE_TO_OCR, WORKFLOW_VISION_PDF_OCR};

#[derive(Debug, Deserialize)]
struct ImageToOcrPayload {
    image_path: String,
    page: i64,
    dossier_id: String,
    owner_id: String,
    #[serde(default)]
    original_token: Option<String>,
}

pub async fn image_to_ocr(deps: HandlerDeps, ctx: JobContext, payload: Value) -> HandlerResult {
    if ctx.is_cancelled() {
        return Err(HandlerError::transient("worker shutting down"));
    }

    let parsed: ImageToOcrPayload = serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::permanent(format!("malformed payload: {e}")))?;
    let envelope = WorkflowEnvelope::from_payload(&payload)
        .ok_or_else(|| HandlerError::permanent("payload missing workflow envelope"))?;

    let image_bytes = tokio::fs::read(&parsed.image_path)
        .await
        .map_err(|e| HandlerError::transient(format!("read {}: {e}", parsed.image_path)))?;
    let input_hash = content_hash(&image_bytes);

    let outcome = deps
        .trace
        .start(
            WORKFLOW_VISION_PDF_OCR,
            &envelope.run_id,
            STEP_IMAGE_TO_OCR,
            &input_hash,
            &json!({"image_path": parsed.image_path, "page": parsed.page}),
        )
        .await
        .map_err(HandlerError::transient)?;

    let (text_path, replayed) = match outcome {
        StartOutcome::Duplicate { trace_id } => {
            let prior = deps.trace.load(trace_id).await.map_err(HandlerError::transient)?;
            let paths = prior.artifact_paths().map_err(HandlerError::transient)?;
            let text_path = paths
                .into_iter()
                .next()
                .ok_or_else(|| HandlerError::transient("trace row has no transcript artifact"))?;
            info!(page = parsed.page, "OCR replayed from trace");
            (text_path, true)
        }
        StartOutcome::Fresh { trace_id } => {
            let result = async {
                let text = deps
                    .ocr
                    .recognize(
                        parsed.image_path.as_ref(),
                        parsed.original_token.as_deref(),
                    )
                    .await?;
                let text_path = format!("{}.txt", parsed.image_path);
                tokio::fs::write(&text_path, text.as_bytes()).await?;
                Ok::<_, anyhow::Error>((text_path, text.len()))
            }
            .await;

            match result {
                Ok((text_path, chars)) => {
                    let outcome = deps
                        .trace
                        .complete(
                            trace_id,
                            Some(&parsed.image_path),
                            &[text_path.clone()],
                            &json!({"page": parsed.page, "chars": chars}),
                        )
                        .await
                        .map_err(HandlerError::transient)?;
                    if let CompleteOutcome::LostRace { existing_trace_id } = outcome {
                        info!(%existing_trace_id, "Concurrent run recorded this step first");
                    }
                    (text_path, false)
                }
                Err(e) => {
                    deps.trace
                        .fail(trace_id, "ocr_failed", &format!("{e:#}"))
                        .await
                        .ok();
                    return Err(HandlerError::transient(format!("{e:#}")));
                }
            }
        }
    };

    let artifacts = vec![json!({
        "text_path": text_path,
        "page": parsed.page,
        "dossier_id": parsed.dossier_id,
        "owner_id": parsed.owner_id,
        "original_token": parsed.original_token,
    })];

    let spawned = chain::spawn_successors(&*ctx.queue, &payload, artifacts)
        .await
        .map_err(HandlerError::transient)?;

    Ok(json!({
        "text_path": text_path,
        "replayed": replayed,
        "spawned": spawned.len(),
    }))
}
