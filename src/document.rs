//! Uploaded file → plain text.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Kind of uploaded file, from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
    Sheet,
    Json,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "csv" | "xlsx" | "xlsm" | "xlsb" => Self::Sheet,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Extract text from a PDF file using lopdf, one block per page separated
/// by a form feed.
pub fn extract_pdf_text(data: &[u8]) -> Result<String> {
    use lopdf::Document;
    use std::io::Cursor;

    let doc = Document::load_from(Cursor::new(data))
        .map_err(|e| anyhow!("Failed to load PDF: {}", e))?;

    let pages = doc.get_pages();
    let mut blocks = Vec::with_capacity(pages.len());

    for (page_num, _) in pages {
        match doc.extract_text(&[page_num]) {
            Ok(content) => blocks.push(content),
            Err(e) => warn!("Skipping page {}: {}", page_num, e),
        }
    }

    debug!("Extracted text from {} PDF pages", blocks.len());
    Ok(blocks.join("\n\u{000C}\n"))
}

/// Text for a non-tabular upload. PDFs go through lopdf, anything else is
/// read as UTF-8 (lossy).
pub fn extract_text(filename: &str, data: &[u8]) -> Result<String> {
    match DocumentKind::from_filename(filename) {
        DocumentKind::Pdf => extract_pdf_text(data),
        _ => Ok(String::from_utf8_lossy(data).to_string()),
    }
}

/// Hex SHA-256 of the extracted text, recorded on imported banks.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
