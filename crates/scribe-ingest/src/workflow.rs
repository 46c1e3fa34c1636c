//! Workflow names, step types, and content kind inference

use scribe_core::{Error, Result};

/// The PDF/image OCR ingestion workflow
pub const WORKFLOW_VISION_PDF_OCR: &str = "vision_pdf_ocr";

pub const STEP_PDF_TO_IMAGES: &str = "pdf_to_images";
pub const STEP_IMAGE_TO_OCR: &str = "image_to_ocr";
pub const STEP_OCR_TO_DATABASE: &str = "ocr_to_database";

/// Content kind inferred from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Image,
}

impl ContentKind {
    /// Sniff the leading bytes of a blob.
    pub fn sniff(head: &[u8]) -> Result<Self> {
        if head.starts_with(b"%PDF-") {
            Ok(Self::Pdf)
        } else if head.starts_with(&[0x89, b'P', b'N', b'G'])
            || head.starts_with(&[0xFF, 0xD8, 0xFF])
        {
            Ok(Self::Image)
        } else {
            Err(Error::validation("unknown content category"))
        }
    }

    /// Root job type and successor chain for this kind.
    ///
    /// PDFs enter at rasterization; images skip straight to OCR.
    pub fn workflow_entry(&self) -> (&'static str, Vec<String>) {
        match self {
            Self::Pdf => (
                STEP_PDF_TO_IMAGES,
                vec![STEP_IMAGE_TO_OCR.to_string(), STEP_OCR_TO_DATABASE.to_string()],
            ),
            Self::Image => (STEP_IMAGE_TO_OCR, vec![STEP_OCR_TO_DATABASE.to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(ContentKind::sniff(b"%PDF-1.7 rest").unwrap(), ContentKind::Pdf);
    }

    #[test]
    fn test_sniff_images() {
        assert_eq!(
            ContentKind::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]).unwrap(),
            ContentKind::Image
        );
        assert_eq!(
            ContentKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap(),
            ContentKind::Image
        );
    }

    #[test]
    fn test_sniff_unknown_is_validation_error() {
        assert!(matches!(
            ContentKind::sniff(b"GIF89a"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_workflow_entry_chains() {
        let (root, chain) = ContentKind::Pdf.workflow_entry();
        assert_eq!(root, STEP_PDF_TO_IMAGES);
        assert_eq!(chain, vec![STEP_IMAGE_TO_OCR, STEP_OCR_TO_DATABASE]);

        let (root, chain) = ContentKind::Image.workflow_entry();
        assert_eq!(root, STEP_IMAGE_TO_OCR);
        assert_eq!(chain, vec![STEP_OCR_TO_DATABASE]);
    }
}
