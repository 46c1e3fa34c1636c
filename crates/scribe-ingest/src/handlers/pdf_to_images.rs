//! pdf_to_images: rasterize a PDF into one image per page

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use scribe_core::envelope::WorkflowEnvelope;
use scribe_core::hash::content_hash;
use scribe_durable::{chain, HandlerError, HandlerResult, JobContext};
use scribe_storage::{StartOutcome, TraceStore};

use super::HandlerDeps;
use crate::workflow::{STEP_PDF_TO_IMAGES, WORKFLOW_VISION_PDF_OCR};

#[derive(Debug, Deserialize)]
struct PdfToImagesPayload {
    source_path: String,
    dossier_id: String,
    owner_id: String,
    #[serde(default)]
    original_token: Option<String>,
}

pub async fn pdf_to_images(deps: HandlerDeps, ctx: JobContext, payload: Value) -> HandlerResult {
    if ctx.is_cancelled() {
        return Err(HandlerError::transient("worker shutting down"));
    }

    let parsed: PdfToImagesPayload = serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::permanent(format!("malformed payload: {e}")))?;
    let envelope = WorkflowEnvelope::from_payload(&payload)
        .ok_or_else(|| HandlerError::permanent("payload missing workflow envelope"))?;

    let pdf_bytes = tokio::fs::read(&parsed.source_path)
        .await
        .map_err(|e| HandlerError::transient(format!("read {}: {e}", parsed.source_path)))?;
    let input_hash = content_hash(&pdf_bytes);

    let outcome = deps
        .trace
        .start(
            WORKFLOW_VISION_PDF_OCR,
            &envelope.run_id,
            STEP_PDF_TO_IMAGES,
            &input_hash,
            &json!({"source_path": parsed.source_path}),
        )
        .await
        .map_err(HandlerError::transient)?;

    let (image_paths, replayed) = match outcome {
        StartOutcome::Duplicate { trace_id } => {
            let prior = deps.trace.load(trace_id).await.map_err(HandlerError::transient)?;
            let paths = prior.artifact_paths().map_err(HandlerError::transient)?;
            info!(
                run_id = %envelope.run_id,
                pages = paths.len(),
                "Rasterization replayed from trace"
            );
            (paths, true)
        }
        StartOutcome::Fresh { trace_id } => {
            let prefix = deps.work_dir.join(&envelope.run_id).join("page");
            let result = async {
                let pages = deps.pdf.page_count(parsed.source_path.as_ref()).await?;
                let paths = deps
                    .pdf
                    .rasterize(parsed.source_path.as_ref(), &prefix)
                    .await?;
                anyhow::ensure!(
                    paths.len() == pages as usize,
                    "rasterizer produced {} files for {} pages",
                    paths.len(),
                    pages
                );
                Ok::<_, anyhow::Error>(paths)
            }
            .await;

            match result {
                Ok(paths) => {
                    let artifact_paths: Vec<String> = paths
                        .iter()
                        .map(|p| p.to_string_lossy().to_string())
                        .collect();
                    record_complete(
                        &deps.trace,
                        trace_id,
                        &parsed.source_path,
                        &artifact_paths,
                    )
                    .await?;
                    (artifact_paths, false)
                }
                Err(e) => {
                    deps.trace
                        .fail(trace_id, "rasterize_failed", &format!("{e:#}"))
                        .await
                        .ok();
                    return Err(HandlerError::transient(format!("{e:#}")));
                }
            }
        }
    };

    let artifacts: Vec<Value> = image_paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            json!({
                "image_path": path,
                "page": i as i64 + 1,
                "dossier_id": parsed.dossier_id,
                "owner_id": parsed.owner_id,
                "original_token": parsed.original_token,
            })
        })
        .collect();

    let spawned = chain::spawn_successors(&*ctx.queue, &payload, artifacts)
        .await
        .map_err(HandlerError::transient)?;

    Ok(json!({
        "pages": image_paths.len(),
        "replayed": replayed,
        "spawned": spawned.len(),
    }))
}

async fn record_complete(
    trace: &TraceStore,
    trace_id: uuid::Uuid,
    source_path: &str,
    artifact_paths: &[String],
) -> Result<(), HandlerError> {
    use scribe_storage::CompleteOutcome;

    let outcome = trace
        .complete(
            trace_id,
            Some(source_path),
            artifact_paths,
            &json!({"pages": artifact_paths.len()}),
        )
        .await
        .map_err(HandlerError::transient)?;

    // Losing the completion race is fine: the winner recorded the same
    // content-addressed work
    if let CompleteOutcome::LostRace { existing_trace_id } = outcome {
        info!(%existing_trace_id, "Concurrent run recorded this step first");
    }
    Ok(())
}
