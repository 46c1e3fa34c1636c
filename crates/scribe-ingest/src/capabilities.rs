//! Capability interfaces for external tools
//!
//! Handlers never shell out or speak HTTP directly; they go through these
//! traits so tests can substitute in-memory fakes.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// PDF introspection and rasterization
#[async_trait]
pub trait PdfTools: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf_path: &Path) -> Result<u32>;

    /// Rasterize every page to an image file named `<output_prefix>-N.png`.
    /// Returns the produced paths in page order.
    async fn rasterize(&self, pdf_path: &Path, output_prefix: &Path) -> Result<Vec<PathBuf>>;
}

/// OCR of a single page image
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Recognize text in the image; `token` is the caller's verbatim
    /// credential for backends that meter per user.
    async fn recognize(&self, image_path: &Path, token: Option<&str>) -> Result<String>;
}

/// PdfTools backed by poppler's pdfinfo / pdftoppm binaries.
pub struct PopplerPdfTools {
    pdfinfo_bin: String,
    pdftoppm_bin: String,
    resolution_dpi: u32,
}

impl Default for PopplerPdfTools {
    fn default() -> Self {
        Self {
            pdfinfo_bin: "pdfinfo".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            resolution_dpi: 150,
        }
    }
}

impl PopplerPdfTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(mut self, pdfinfo: impl Into<String>, pdftoppm: impl Into<String>) -> Self {
        self.pdfinfo_bin = pdfinfo.into();
        self.pdftoppm_bin = pdftoppm.into();
        self
    }
}

#[async_trait]
impl PdfTools for PopplerPdfTools {
    async fn page_count(&self, pdf_path: &Path) -> Result<u32> {
        let output = Command::new(&self.pdfinfo_bin)
            .arg(pdf_path)
            .output()
            .await
            .with_context(|| format!("spawn {}", self.pdfinfo_bin))?;

        if !output.status.success() {
            bail!(
                "{} failed ({}): {}",
                self.pdfinfo_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                return rest
                    .trim()
                    .parse()
                    .with_context(|| format!("parse page count from {rest:?}"));
            }
        }
        bail!("no Pages line in pdfinfo output");
    }

    async fn rasterize(&self, pdf_path: &Path, output_prefix: &Path) -> Result<Vec<PathBuf>> {
        if let Some(parent) = output_prefix.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new(&self.pdftoppm_bin)
            .arg("-png")
            .arg("-r")
            .arg(self.resolution_dpi.to_string())
            .arg(pdf_path)
            .arg(output_prefix)
            .output()
            .await
            .with_context(|| format!("spawn {}", self.pdftoppm_bin))?;

        if !output.status.success() {
            bail!(
                "{} failed ({}): {}",
                self.pdftoppm_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        // pdftoppm names outputs <prefix>-1.png, <prefix>-2.png, ...
        let dir = output_prefix.parent().unwrap_or_else(|| Path::new("."));
        let stem = output_prefix
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&stem) && name.ends_with(".png") {
                pages.push(entry.path());
            }
        }
        pages.sort();
        debug!(pdf = %pdf_path.display(), pages = pages.len(), "Rasterized");
        Ok(pages)
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

/// OcrClient backed by an HTTP OCR service.
pub struct HttpOcrClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image_path: &Path, token: Option<&str>) -> Result<String> {
        let bytes = tokio::fs::read(image_path).await?;

        let mut request = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .header("content-type", "application/octet-stream")
            .body(bytes);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("ocr request")?
            .error_for_status()
            .context("ocr status")?;

        let parsed: OcrResponse = response.json().await.context("ocr response body")?;
        Ok(parsed.text)
    }
}
