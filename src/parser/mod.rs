//! Heuristic question parser: normalized lines → segmenter → field extractor.
//!
//! Pure functions, no async. The LLM path in `llm_extract` is the
//! alternative to this module, chosen by the caller.

pub mod fields;
pub mod normalize;
pub mod segment;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ParserConfig;
use crate::error::ExtractError;
pub use fields::DraftQuestion;
use segment::Strategy;

/// Result of a successful regex extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub strategy: Strategy,
    pub questions: Vec<DraftQuestion>,
    /// Spans that were found but failed draft validation.
    pub rejected_spans: usize,
}

/// Extract drafts from raw text.
pub fn extract_questions(text: &str, config: &ParserConfig) -> Result<ParseOutcome, ExtractError> {
    let lines = normalize::normalize_lines(text);
    extract_from_lines(&lines, config)
}

/// Extract drafts from already-normalized lines.
pub fn extract_from_lines(
    lines: &[String],
    config: &ParserConfig,
) -> Result<ParseOutcome, ExtractError> {
    let (strategy, spans) =
        segment::segment(lines, config.min_span_chars).ok_or(ExtractError::Empty)?;

    let span_count = spans.len();
    let questions: Vec<DraftQuestion> = spans.iter().filter_map(fields::extract_fields).collect();
    let rejected_spans = span_count - questions.len();

    if rejected_spans > 0 {
        debug!("{} spans rejected during field extraction", rejected_spans);
    }

    if questions.is_empty() {
        return Err(ExtractError::Empty);
    }

    info!(
        "Parsed {} questions from {} lines using {:?}",
        questions.len(),
        lines.len(),
        strategy
    );

    Ok(ParseOutcome {
        strategy,
        questions,
        rejected_spans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OptionLetter;

    #[test]
    fn test_numeric_prefix_end_to_end() {
        let text = "1. What is X?\na) A\nb) B\nc) C\nd) D\nAnswer: b\n2. What is Y?\na) A2\nb) B2\nc) C2\nd) D2";
        let outcome = extract_questions(text, &ParserConfig::default()).unwrap();
        assert_eq!(outcome.strategy, Strategy::NumericPrefix);
        assert_eq!(outcome.questions.len(), 2);
        assert_eq!(outcome.questions[0].number, 1);
        assert_eq!(outcome.questions[1].number, 2);
        assert_eq!(outcome.questions[0].answer, Some(OptionLetter::B));
        assert_eq!(outcome.questions[1].answer, None);
    }

    #[test]
    fn test_preamble_and_page_breaks() {
        let text = "UPSC Prelims Mock 3\nTime: 2 hours\n\u{000C}Q1. Which Article deals with the Finance Commission?\n(a) 280\n(b) 312\nAns: a\n--- Page 2 ---\nQ2. Who appoints the CAG?\n(a) President\n(b) PM\nAns: a";
        let outcome = extract_questions(text, &ParserConfig::default()).unwrap();
        assert_eq!(outcome.strategy, Strategy::QPrefix);
        assert_eq!(outcome.questions.len(), 2);
        assert_eq!(outcome.questions[1].text_en, "Who appoints the CAG?");
    }

    #[test]
    fn test_spans_without_options_are_rejected() {
        let text = "1. Read the passage below carefully\n2. Which word means brave?\na) Valiant\nb) Timid";
        let outcome = extract_questions(text, &ParserConfig::default()).unwrap();
        assert_eq!(outcome.questions.len(), 1);
        assert_eq!(outcome.rejected_spans, 1);
    }

    #[test]
    fn test_empty_text_is_extraction_empty() {
        let err = extract_questions("no questions here at all", &ParserConfig::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }
}
