//! Workflow step handlers
//!
//! Each handler is trace-wrapped: it hashes its principal input, asks the
//! trace store whether this exact step already completed, and either replays
//! the recorded artifacts or does the work and records them. Chain fan-out
//! happens in both branches, so a replayed step still schedules successors.

mod image_to_ocr;
mod ocr_to_database;
mod pdf_to_images;

use std::path::PathBuf;
use std::sync::Arc;

use scribe_durable::HandlerRegistry;
use scribe_storage::{Database, TraceStore};

use crate::capabilities::{OcrClient, PdfTools};
use crate::workflow::{STEP_IMAGE_TO_OCR, STEP_OCR_TO_DATABASE, STEP_PDF_TO_IMAGES};

pub use image_to_ocr::image_to_ocr;
pub use ocr_to_database::ocr_to_database;
pub use pdf_to_images::pdf_to_images;

/// Capabilities shared by every handler, passed by value at registration.
#[derive(Clone)]
pub struct HandlerDeps {
    pub db: Database,
    pub trace: TraceStore,
    pub pdf: Arc<dyn PdfTools>,
    pub ocr: Arc<dyn OcrClient>,
    /// Root directory for step artifacts (page images, transcripts)
    pub work_dir: PathBuf,
}

/// Per-step concurrency caps
#[derive(Debug, Clone, Copy)]
pub struct StepConcurrency {
    pub pdf_to_images: usize,
    pub image_to_ocr: usize,
    pub ocr_to_database: usize,
}

impl Default for StepConcurrency {
    fn default() -> Self {
        // Rasterization is memory-heavy, OCR is network-bound, the database
        // step is cheap but shares the main store's single writer
        Self {
            pdf_to_images: 1,
            image_to_ocr: 4,
            ocr_to_database: 1,
        }
    }
}

/// Register every workflow step handler.
pub fn build_registry(deps: HandlerDeps, concurrency: StepConcurrency) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let d = deps.clone();
    registry.register(STEP_PDF_TO_IMAGES, move |ctx, payload| {
        pdf_to_images(d.clone(), ctx, payload)
    });
    registry.set_concurrency(STEP_PDF_TO_IMAGES, concurrency.pdf_to_images);

    let d = deps.clone();
    registry.register(STEP_IMAGE_TO_OCR, move |ctx, payload| {
        image_to_ocr(d.clone(), ctx, payload)
    });
    registry.set_concurrency(STEP_IMAGE_TO_OCR, concurrency.image_to_ocr);

    let d = deps;
    registry.register(STEP_OCR_TO_DATABASE, move |ctx, payload| {
        ocr_to_database(d.clone(), ctx, payload)
    });
    registry.set_concurrency(STEP_OCR_TO_DATABASE, concurrency.ocr_to_database);

    registry
}
