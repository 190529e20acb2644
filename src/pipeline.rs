//! Uploaded document → question bank.
//!
//! Shared by the `/extract` handlers and the `extract` command. The caller
//! picks the strategy for text documents; sheets are always read by column
//! and `.json` uploads are checked as banks.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::bank::{self, BankMeta};
use crate::config::ParserConfig;
use crate::document::{self, DocumentKind};
use crate::error::ExtractError;
use crate::llm_extract::LlmExtractor;
use crate::parser::{self, segment::Strategy, DraftQuestion};
use crate::schema::QuestionBank;
use crate::sheet_import;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Regex,
    Ai,
}

/// A built bank plus how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub bank: QuestionBank,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub rejected_spans: usize,
    /// SHA-256 of the source content.
    pub content_hash: String,
}

/// Title used when the caller gave none.
fn title_from_filename(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .replace(['_', '-'], " ")
        .trim()
        .to_string()
}

fn with_default_title(mut meta: BankMeta, filename: &str) -> BankMeta {
    if meta.title_en.trim().is_empty() {
        meta.title_en = title_from_filename(filename);
    }
    meta
}

/// Run one extraction. `llm` is required for [`Mode::Ai`] on text documents.
pub async fn extract_document(
    filename: &str,
    data: &[u8],
    mode: Mode,
    meta: BankMeta,
    config: &ParserConfig,
    llm: Option<&LlmExtractor>,
) -> Result<Extraction, ExtractError> {
    let meta = with_default_title(meta, filename);

    match DocumentKind::from_filename(filename) {
        DocumentKind::Json => {
            let bank: QuestionBank = serde_json::from_slice(data)
                .map_err(|e| ExtractError::Parse(format!("Invalid question bank: {}", e)))?;
            if bank.questions.is_empty() {
                return Err(ExtractError::Empty);
            }
            Ok(Extraction {
                content_hash: document::content_hash(&String::from_utf8_lossy(data)),
                bank,
                strategy: None,
                rejected_spans: 0,
            })
        }
        DocumentKind::Sheet => {
            let sheets = sheet_import::parse_file(filename, data)
                .map_err(|e| ExtractError::Parse(format!("{:#}", e)))?;
            let drafts = sheet_import::sheets_to_drafts(&sheets)?;
            Ok(finish(
                drafts,
                None,
                0,
                document::content_hash(&String::from_utf8_lossy(data)),
                meta,
                config,
            ))
        }
        DocumentKind::Pdf | DocumentKind::Text => {
            let text = document::extract_text(filename, data)
                .map_err(|e| ExtractError::Parse(format!("{:#}", e)))?;
            if text.trim().is_empty() {
                return Err(ExtractError::Parse(format!(
                    "Could not extract text from {}",
                    filename
                )));
            }
            extract_text(&text, mode, meta, config, llm).await
        }
    }
}

/// Text already extracted from a document.
pub async fn extract_text(
    text: &str,
    mode: Mode,
    meta: BankMeta,
    config: &ParserConfig,
    llm: Option<&LlmExtractor>,
) -> Result<Extraction, ExtractError> {
    let hash = document::content_hash(text);

    match mode {
        Mode::Regex => {
            let outcome = parser::extract_questions(text, config)?;
            Ok(finish(
                outcome.questions,
                Some(outcome.strategy),
                outcome.rejected_spans,
                hash,
                meta,
                config,
            ))
        }
        Mode::Ai => {
            let llm = llm.ok_or_else(|| {
                ExtractError::Validation("No API key configured".to_string())
            })?;
            let drafts = llm.extract(text).await?;
            Ok(finish(drafts, None, 0, hash, meta, config))
        }
    }
}

/// Lines rebuilt from positioned fragments. Always the regex path.
pub fn extract_lines(
    lines: &[String],
    meta: BankMeta,
    config: &ParserConfig,
) -> Result<Extraction, ExtractError> {
    let outcome = parser::extract_from_lines(lines, config)?;
    Ok(finish(
        outcome.questions,
        Some(outcome.strategy),
        outcome.rejected_spans,
        document::content_hash(&lines.join("\n")),
        meta,
        config,
    ))
}

fn finish(
    drafts: Vec<DraftQuestion>,
    strategy: Option<Strategy>,
    rejected_spans: usize,
    content_hash: String,
    meta: BankMeta,
    config: &ParserConfig,
) -> Extraction {
    let bank = bank::build_bank(drafts, meta, config);
    info!(
        "Built bank '{}' with {} questions ({} min)",
        bank.title_en, bank.total_questions, bank.time_limit_minutes
    );
    Extraction {
        bank,
        strategy,
        rejected_spans,
        content_hash,
    }
}
