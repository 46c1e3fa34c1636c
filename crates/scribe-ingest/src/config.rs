// Environment-driven configuration for the ingest stack

use std::path::PathBuf;
use std::time::Duration;

use crate::handlers::StepConcurrency;

/// Default upload size cap: 512 MiB
const DEFAULT_MAX_UPLOAD_SIZE: i64 = 512 * 1024 * 1024;

/// Default TTL before a receiving upload is reported as abandoned: 7 days
const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Ingest configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of the blob layout: `<chunks_dir>/<dossier_id>/<blob_id>`
    pub chunks_dir: PathBuf,

    /// Working directory for step artifacts
    pub work_dir: PathBuf,

    /// Upload size cap advertised as Tus-Max-Size
    pub max_upload_size: i64,

    /// Receiving uploads older than this are reported at boot; they stay
    /// resumable until their dossier is deleted
    pub upload_ttl: Duration,

    /// Base URL of the OCR backend
    pub ocr_base_url: String,

    /// Per-step worker concurrency
    pub concurrency: StepConcurrency,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunks_dir: PathBuf::from("data/chunks"),
            work_dir: PathBuf::from("data/work"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            upload_ttl: DEFAULT_UPLOAD_TTL,
            ocr_base_url: "http://127.0.0.1:8601".to_string(),
            concurrency: StepConcurrency::default(),
        }
    }
}

impl IngestConfig {
    /// Read configuration from `SCRIBE_*` environment variables, falling
    /// back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SCRIBE_CHUNKS_DIR") {
            config.chunks_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SCRIBE_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(size) = env_parse::<i64>("SCRIBE_MAX_UPLOAD_SIZE") {
            config.max_upload_size = size;
        }
        if let Some(days) = env_parse::<u64>("SCRIBE_UPLOAD_TTL_DAYS") {
            config.upload_ttl = Duration::from_secs(days * 24 * 3600);
        }
        if let Ok(url) = std::env::var("SCRIBE_OCR_URL") {
            config.ocr_base_url = url;
        }
        if let Some(n) = env_parse::<usize>("SCRIBE_OCR_CONCURRENCY") {
            config.concurrency.image_to_ocr = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("SCRIBE_PDF_CONCURRENCY") {
            config.concurrency.pdf_to_images = n.max(1);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
        assert_eq!(config.upload_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.concurrency.pdf_to_images, 1);
    }
}
