//! Shared fixtures for ingest integration tests

// Each integration test binary compiles its own copy; not all of them use
// every fixture
#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use scribe_durable::{InMemoryJobStore, RetryPolicy, WorkerConfig};
use scribe_ingest::{
    HandlerDeps, IngestController, OcrClient, PdfTools, StepConcurrency, UploadManager,
};
use scribe_storage::{CreateDossier, Database, ObservabilityStore, TraceStore};

/// Fake rasterizer producing `pages` page files per call and counting
/// invocations, for replay-determinism assertions.
pub struct FakePdfTools {
    pages: u32,
    calls: AtomicUsize,
}

impl FakePdfTools {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdfTools for FakePdfTools {
    async fn page_count(&self, _pdf_path: &Path) -> Result<u32> {
        Ok(self.pages)
    }

    async fn rasterize(&self, _pdf_path: &Path, output_prefix: &Path) -> Result<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = output_prefix.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stem = output_prefix
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut paths = Vec::new();
        for page in 1..=self.pages {
            let path = output_prefix.with_file_name(format!("{stem}-{page}.png"));
            tokio::fs::write(&path, format!("png bytes page {page}")).await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Fake OCR with a deterministic transcript per image; the first `fail_first`
/// calls error to exercise transient retries.
pub struct FakeOcrClient {
    calls: AtomicUsize,
    fail_first: AtomicUsize,
}

impl FakeOcrClient {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(n),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrClient for FakeOcrClient {
    async fn recognize(&self, image_path: &Path, _token: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("ocr backend unavailable");
        }
        Ok(format!("text of {}", image_path.display()))
    }
}

/// Everything a pipeline test needs, over in-memory stores and a temp dir.
pub struct TestStack {
    pub db: Database,
    pub trace: TraceStore,
    pub observability: ObservabilityStore,
    pub queue: Arc<InMemoryJobStore>,
    pub manager: UploadManager,
    pub controller: IngestController,
    pub pdf: Arc<FakePdfTools>,
    pub ocr: Arc<FakeOcrClient>,
    pub deps: HandlerDeps,
    pub tmp: TempDir,
}

pub async fn stack_with(pages: u32, ocr: FakeOcrClient) -> TestStack {
    let tmp = TempDir::new().expect("tempdir");
    let db = Database::from_url("sqlite::memory:").await.expect("main db");
    let trace = TraceStore::from_url("sqlite::memory:").await.expect("trace db");
    let observability = ObservabilityStore::from_url("sqlite::memory:")
        .await
        .expect("observability db");
    let queue = Arc::new(InMemoryJobStore::new().with_default_max_attempts(3));

    let pdf = Arc::new(FakePdfTools::new(pages));
    let ocr = Arc::new(ocr);

    let deps = HandlerDeps {
        db: db.clone(),
        trace: trace.clone(),
        pdf: pdf.clone(),
        ocr: ocr.clone(),
        work_dir: tmp.path().join("work"),
    };

    let manager = UploadManager::new(db.clone(), tmp.path().join("chunks"), 64 * 1024 * 1024);
    let controller = IngestController::new(db.clone(), queue.clone(), observability.clone());

    TestStack {
        db,
        trace,
        observability,
        queue,
        manager,
        controller,
        pdf,
        ocr,
        deps,
        tmp,
    }
}

pub async fn stack(pages: u32) -> TestStack {
    stack_with(pages, FakeOcrClient::new()).await
}

impl TestStack {
    pub async fn dossier(&self, id: &str, owner: &str) {
        self.db
            .create_dossier(CreateDossier {
                id: id.to_string(),
                owner_id: owner.to_string(),
                title: None,
            })
            .await
            .expect("create dossier");
    }

    /// Worker config tuned for test latency.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_poll_intervals(Duration::from_millis(5), Duration::from_millis(25))
            .with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
            .with_shutdown_grace(Duration::from_secs(5))
    }

    pub fn step_concurrency(&self) -> StepConcurrency {
        StepConcurrency {
            pdf_to_images: 1,
            image_to_ocr: 4,
            ocr_to_database: 2,
        }
    }
}

/// Await a condition with a hard deadline.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if cond().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within deadline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
