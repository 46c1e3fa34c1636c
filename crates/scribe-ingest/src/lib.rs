// Ingest stack: resumable uploads feeding the durable workflow chain
//
// Key design decisions:
// - External tools (pdfinfo/pdftoppm, the OCR service) sit behind capability
//   traits so the pipeline is testable with in-memory fakes
// - Every step is trace-wrapped: identical input bytes short-circuit to the
//   recorded artifacts, so re-ingesting the same content re-runs nothing
// - Upload blobs are owner-scoped content-addressed; a repeat upload of the
//   same bytes by the same owner is deduplicated at completion

pub mod capabilities;
pub mod config;
pub mod controller;
pub mod handlers;
pub mod upload;
pub mod workflow;

pub use capabilities::{HttpOcrClient, OcrClient, PdfTools, PopplerPdfTools};
pub use config::IngestConfig;
pub use controller::{IngestController, IngestReceipt};
pub use handlers::{build_registry, HandlerDeps, StepConcurrency};
pub use upload::{CompletedUpload, PatchOutcome, UploadManager};
pub use workflow::{
    ContentKind, STEP_IMAGE_TO_OCR, STEP_OCR_TO_DATABASE, STEP_PDF_TO_IMAGES,
    WORKFLOW_VISION_PDF_OCR,
};
