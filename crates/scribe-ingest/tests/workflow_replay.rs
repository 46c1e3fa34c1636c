//! Chained workflow and idempotent replay tests
//!
//! Drives the real worker against in-memory stores with fake capabilities.

mod support;

use serde_json::json;

use scribe_core::envelope::WorkflowEnvelope;
use scribe_core::Caller;
use scribe_durable::{chain, JobState, JobStore, Worker};
use scribe_ingest::{
    build_registry, STEP_IMAGE_TO_OCR, STEP_OCR_TO_DATABASE, STEP_PDF_TO_IMAGES,
};
use support::{stack, stack_with, wait_until, FakeOcrClient, TestStack};

async fn write_pdf(stack: &TestStack, name: &str) -> String {
    let path = stack.tmp.path().join(name);
    tokio::fs::write(&path, b"%PDF-1.7 three page fixture")
        .await
        .unwrap();
    path.to_string_lossy().to_string()
}

fn root_payload(source_path: &str) -> serde_json::Value {
    json!({
        "source_path": source_path,
        "dossier_id": "d1",
        "owner_id": "alice",
        "original_token": "token-alice",
        "envelope_id": "env-1",
    })
}

async fn start_worker(stack: &TestStack) -> Worker {
    let registry = build_registry(stack.deps.clone(), stack.step_concurrency());
    let worker = Worker::new(stack.queue.clone(), registry, stack.worker_config());
    worker.start();
    worker
}

async fn wait_for_documents(stack: &TestStack, dossier: &str, count: usize) {
    let db = stack.db.clone();
    let dossier = dossier.to_string();
    wait_until(|| {
        let db = db.clone();
        let dossier = dossier.clone();
        async move {
            db.list_documents(&dossier)
                .await
                .map(|docs| docs.len() == count)
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn test_chained_pdf_workflow_fans_out_per_page() {
    let stack = stack(3).await;
    stack.dossier("d1", "alice").await;
    let source = write_pdf(&stack, "a.pdf").await;

    let (_, run_id) = chain::submit_root(
        &*stack.queue,
        STEP_PDF_TO_IMAGES,
        root_payload(&source),
        vec![STEP_IMAGE_TO_OCR.into(), STEP_OCR_TO_DATABASE.into()],
    )
    .await
    .unwrap();

    let worker = start_worker(&stack).await;
    wait_for_documents(&stack, "d1", 3).await;
    worker.shutdown().await;

    // Three OCR children, each with the tail chain and the parent's run id
    let ocr_jobs = stack.queue.ids_in_state(STEP_IMAGE_TO_OCR, JobState::Done);
    assert_eq!(ocr_jobs.len(), 3);
    for id in ocr_jobs {
        let record = stack.queue.get(id).await.unwrap();
        let env = WorkflowEnvelope::from_payload(&record.payload).unwrap();
        assert_eq!(env.run_id, run_id);
        assert_eq!(env.chain, vec![STEP_OCR_TO_DATABASE]);
        assert_eq!(record.payload["envelope_id"], "env-1");
    }

    // Three terminal children with an empty chain
    let db_jobs = stack.queue.ids_in_state(STEP_OCR_TO_DATABASE, JobState::Done);
    assert_eq!(db_jobs.len(), 3);
    for id in db_jobs {
        let record = stack.queue.get(id).await.unwrap();
        let env = WorkflowEnvelope::from_payload(&record.payload).unwrap();
        assert_eq!(env.run_id, run_id);
        assert!(env.chain.is_empty());
    }

    // The terminal step registered one document per page
    let docs = stack.db.list_documents("d1").await.unwrap();
    assert_eq!(docs.iter().map(|d| d.page).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(docs.iter().all(|d| d.run_id == run_id));

    assert_eq!(stack.pdf.call_count(), 1);
    assert_eq!(stack.ocr.call_count(), 3);
}

#[tokio::test]
async fn test_resubmitting_identical_content_replays_without_work() {
    let stack = stack(3).await;
    stack.dossier("d1", "alice").await;
    let source = write_pdf(&stack, "a.pdf").await;

    let worker = start_worker(&stack).await;

    chain::submit_root(
        &*stack.queue,
        STEP_PDF_TO_IMAGES,
        root_payload(&source),
        vec![STEP_IMAGE_TO_OCR.into(), STEP_OCR_TO_DATABASE.into()],
    )
    .await
    .unwrap();
    wait_for_documents(&stack, "d1", 3).await;

    let pdf_calls_after_first = stack.pdf.call_count();
    let ocr_calls_after_first = stack.ocr.call_count();

    // Same bytes again: every step short-circuits on its trace row
    let (root2, run2) = chain::submit_root(
        &*stack.queue,
        STEP_PDF_TO_IMAGES,
        root_payload(&source),
        vec![STEP_IMAGE_TO_OCR.into(), STEP_OCR_TO_DATABASE.into()],
    )
    .await
    .unwrap();

    let queue = stack.queue.clone();
    wait_until(|| {
        let queue = queue.clone();
        async move {
            queue
                .count_in_state(STEP_OCR_TO_DATABASE, JobState::Done)
                .await
                .map(|n| n == 6)
                .unwrap_or(false)
        }
    })
    .await;
    worker.shutdown().await;

    // Zero external invocations beyond the first run
    assert_eq!(stack.pdf.call_count(), pdf_calls_after_first);
    assert_eq!(stack.ocr.call_count(), ocr_calls_after_first);

    // Successors were still scheduled from the stored artifacts
    let root_record = stack.queue.get(root2).await.unwrap();
    assert_eq!(root_record.state, JobState::Done);
    assert_eq!(root_record.result.as_ref().unwrap()["replayed"], true);
    assert_eq!(root_record.result.as_ref().unwrap()["spawned"], 3);

    // No new documents and no new trace rows under the second run
    assert_eq!(stack.db.list_documents("d1").await.unwrap().len(), 3);
    assert!(stack.trace.list_run(&run2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_ocr_outage_is_retried() {
    let stack = stack_with(2, FakeOcrClient::failing_first(1)).await;
    stack.dossier("d1", "alice").await;
    let source = write_pdf(&stack, "b.pdf").await;

    chain::submit_root(
        &*stack.queue,
        STEP_PDF_TO_IMAGES,
        root_payload(&source),
        vec![STEP_IMAGE_TO_OCR.into(), STEP_OCR_TO_DATABASE.into()],
    )
    .await
    .unwrap();

    let worker = start_worker(&stack).await;
    wait_for_documents(&stack, "d1", 2).await;
    worker.shutdown().await;

    // One page needed a second attempt after the fake outage
    assert_eq!(stack.ocr.call_count(), 3);
    let failed = stack.queue.ids_in_state(STEP_IMAGE_TO_OCR, JobState::Failed);
    assert!(failed.is_empty());
}

#[tokio::test]
async fn test_upload_to_documents_end_to_end_with_dedup() {
    let stack = stack(2).await;
    stack.dossier("d1", "alice").await;
    let caller = Caller::new("alice").with_token("token-alice");

    let body = b"%PDF-1.7 uploaded fixture".to_vec();

    // First upload: full chain runs
    let upload = stack
        .manager
        .create(&caller, "d1", body.len() as i64)
        .await
        .unwrap();
    stack
        .manager
        .patch(&caller, &upload.id, 0, &body[..])
        .await
        .unwrap();
    let completed = stack.manager.complete(&caller, &upload.id).await.unwrap();
    let receipt = stack
        .controller
        .ingest_completed(&caller, &completed)
        .await
        .unwrap();
    assert!(!receipt.deduplicated);
    let first_run = receipt.run_id.clone().unwrap();

    let worker = start_worker(&stack).await;
    wait_for_documents(&stack, "d1", 2).await;
    worker.shutdown().await;

    // Second upload of the same bytes: dedup, no new root job
    let upload2 = stack
        .manager
        .create(&caller, "d1", body.len() as i64)
        .await
        .unwrap();
    stack
        .manager
        .patch(&caller, &upload2.id, 0, &body[..])
        .await
        .unwrap();
    let completed2 = stack.manager.complete(&caller, &upload2.id).await.unwrap();
    assert!(completed2.deduplicated);

    let receipt2 = stack
        .controller
        .ingest_completed(&caller, &completed2)
        .await
        .unwrap();
    assert!(receipt2.deduplicated);
    assert_eq!(receipt2.run_id.as_deref(), Some(first_run.as_str()));
    assert!(receipt2.job_id.is_none());

    // Still exactly one root job ever submitted
    assert_eq!(
        stack
            .queue
            .count_in_state(STEP_PDF_TO_IMAGES, JobState::Done)
            .await
            .unwrap(),
        1
    );
}
