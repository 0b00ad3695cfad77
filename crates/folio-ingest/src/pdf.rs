//! Per-page PDF text extraction.
//!
//! Uses lopdf to decode each page's content stream on a blocking task.

use folio_core::ExtractError;
use lopdf::Document;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Raw text of one PDF page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    /// Page number (1-indexed)
    pub page_number: u32,
    pub text: String,
}

/// Extractor for PDF files.
pub struct PdfPageExtractor;

impl PdfPageExtractor {
    /// Create a new PDF extractor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Whether the path looks like a PDF.
    pub fn can_extract(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }

    /// Extract the text of every readable page, in page order.
    pub async fn extract(&self, path: &Path) -> Result<Vec<PageText>, ExtractError> {
        if !self.can_extract(path) {
            return Err(ExtractError::UnsupportedType(path.display().to_string()));
        }

        debug!("Extracting PDF: {:?}", path);
        let bytes = tokio::fs::read(path).await?;

        tokio::task::spawn_blocking(move || extract_pages(&bytes))
            .await
            .map_err(|e| ExtractError::Failed(format!("Task join error: {e}")))?
    }
}

impl Default for PdfPageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract per-page text from PDF bytes. Pages that fail to decode are
/// skipped.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| ExtractError::Parse(format!("Failed to load PDF: {e}")))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().into_keys() {
        match doc.extract_text(&[page_number]) {
            Ok(text) => pages.push(PageText { page_number, text }),
            Err(e) => warn!("Skipping unreadable page {}: {}", page_number, e),
        }
    }

    debug!("Extracted {} pages", pages.len());
    Ok(pages)
}
