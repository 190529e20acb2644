//! LLM extraction path: one chat round-trip, strict-JSON reply → drafts.
//!
//! This is an alternative to the regex parser chosen by the caller; it never
//! falls back to the other path on its own and never retries.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::openrouter::{Message, OpenRouterClient};
use crate::parser::fields::{is_devanagari, normalize_difficulty};
use crate::parser::DraftQuestion;
use crate::schema::OptionLetter;

const SYSTEM_PROMPT: &str = r#"You extract multiple-choice questions from exam documents.

Rules:
- Extract EVERY question in the document. Do not skip, merge or summarize.
- Write question text, options and explanations in English. When the source is Hindi, translate to English and keep the original Hindi in the *_hi fields.
- Respond with JSON only. No prose, no markdown.
- If the correct answer is not stated in the document, use null for correct_option.

Schema:
{
  "questions": [
    {
      "question_number": 1,
      "question_text_en": "...",
      "question_text_hi": "... or null",
      "option_a_en": "...", "option_b_en": "...", "option_c_en": "...", "option_d_en": "...",
      "option_a_hi": null, "option_b_hi": null, "option_c_hi": null, "option_d_hi": null,
      "correct_option": "a|b|c|d or null",
      "explanation_en": "...",
      "explanation_hi": null,
      "difficulty": "easy|moderate|hard"
    }
  ]
}"#;

/// Runs the LLM extraction for a document's text.
pub struct LlmExtractor {
    client: OpenRouterClient,
    char_budget: usize,
}

impl LlmExtractor {
    pub fn new(client: OpenRouterClient, char_budget: usize) -> Self {
        Self {
            client,
            char_budget,
        }
    }

    pub async fn extract(&self, text: &str) -> Result<Vec<DraftQuestion>, ExtractError> {
        let body = truncate_for_context(text, self.char_budget);
        if body.len() < text.len() {
            warn!(
                "Document truncated from {} to {} bytes for the LLM",
                text.len(),
                body.len()
            );
        }

        info!(
            "Starting LLM extraction ({} chars, model={})",
            body.chars().count(),
            self.client.model()
        );

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "--- DOCUMENT START ---\n\n{}\n\n--- DOCUMENT END ---\n\nReturn the JSON now.",
                body
            )),
        ];

        let reply = self
            .client
            .chat(messages)
            .await
            .map_err(|e| ExtractError::Network(format!("{:#}", e)))?;

        debug!("Raw LLM reply length: {} chars", reply.len());

        let questions = parse_reply(&reply)?;
        info!("LLM extraction produced {} questions", questions.len());
        Ok(questions)
    }
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_for_context(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[derive(Debug, Deserialize)]
struct LlmQuestion {
    #[serde(default)]
    question_number: Option<u32>,
    #[serde(default)]
    question_text_en: Option<String>,
    #[serde(default)]
    question_text_hi: Option<String>,
    #[serde(default)]
    option_a_en: Option<String>,
    #[serde(default)]
    option_b_en: Option<String>,
    #[serde(default)]
    option_c_en: Option<String>,
    #[serde(default)]
    option_d_en: Option<String>,
    #[serde(default)]
    option_a_hi: Option<String>,
    #[serde(default)]
    option_b_hi: Option<String>,
    #[serde(default)]
    option_c_hi: Option<String>,
    #[serde(default)]
    option_d_hi: Option<String>,
    #[serde(default)]
    correct_option: Option<String>,
    #[serde(default)]
    explanation_en: Option<String>,
    #[serde(default)]
    explanation_hi: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

impl LlmQuestion {
    fn into_draft(self, position: usize) -> DraftQuestion {
        let text = |s: Option<String>| s.map(|v| v.trim().to_string()).unwrap_or_default();

        let mut text_en = text(self.question_text_en);
        let mut text_hi = text(self.question_text_hi);
        // Models sometimes put untranslated Hindi in the English slot.
        if text_hi.is_empty() && is_devanagari(&text_en) {
            std::mem::swap(&mut text_en, &mut text_hi);
        }

        DraftQuestion {
            number: self.question_number.unwrap_or(position as u32 + 1),
            text_en: if text_en.is_empty() { text_hi.clone() } else { text_en },
            text_hi,
            options_en: [
                text(self.option_a_en),
                text(self.option_b_en),
                text(self.option_c_en),
                text(self.option_d_en),
            ],
            options_hi: [
                text(self.option_a_hi),
                text(self.option_b_hi),
                text(self.option_c_hi),
                text(self.option_d_hi),
            ],
            answer: self.correct_option.as_deref().and_then(OptionLetter::parse),
            explanation_en: text(self.explanation_en),
            explanation_hi: text(self.explanation_hi),
            source: None,
            difficulty: self
                .difficulty
                .filter(|d| !d.trim().is_empty())
                .map(|d| normalize_difficulty(&d)),
        }
    }
}

/// Slice from the first `[` or `{` to the last matching closer.
fn json_slice(reply: &str) -> Option<&str> {
    let start = reply.find(['[', '{'])?;
    let closer = if reply[start..].starts_with('[') { ']' } else { '}' };
    let end = reply.rfind(closer)?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a chat reply into drafts. Fenced code markers and surrounding prose
/// are ignored; both `{"questions": [...]}` and a bare array are accepted.
pub fn parse_reply(reply: &str) -> Result<Vec<DraftQuestion>, ExtractError> {
    let unfenced = reply.replace("```json", "").replace("```", "");
    let json_str = json_slice(&unfenced)
        .ok_or_else(|| ExtractError::Parse("No JSON found in LLM reply".to_string()))?;

    let value: serde_json::Value = serde_json::from_str(json_str).map_err(|e| {
        ExtractError::Parse(format!(
            "Invalid JSON syntax ({}): {}",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("questions") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(ExtractError::Parse(
                    "LLM reply object has no \"questions\" array".to_string(),
                ))
            }
        },
        _ => return Err(ExtractError::Parse("LLM reply is not a JSON array or object".to_string())),
    };

    let raw: Vec<LlmQuestion> = serde_json::from_value(serde_json::Value::Array(items))
        .map_err(|e| ExtractError::Parse(format!("JSON structure mismatch: {}", e)))?;

    let drafts: Vec<DraftQuestion> = raw
        .into_iter()
        .enumerate()
        .map(|(i, q)| q.into_draft(i))
        .filter(|d| !d.text_en.is_empty())
        .collect();

    if drafts.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(drafts)
}
