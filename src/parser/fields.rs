//! Classify the lines of one content span into question text, options,
//! answer, explanation and metadata.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::parser::segment::ContentSpan;
use crate::schema::OptionLetter;

/// Loosely-validated extraction result, before schema normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DraftQuestion {
    pub number: u32,
    pub text_en: String,
    pub text_hi: String,
    pub options_en: [String; 4],
    pub options_hi: [String; 4],
    pub answer: Option<OptionLetter>,
    pub explanation_en: String,
    pub explanation_hi: String,
    pub source: Option<String>,
    pub difficulty: Option<String>,
}

impl DraftQuestion {
    pub fn option_count(&self) -> usize {
        self.options_en.iter().filter(|o| !o.is_empty()).count()
    }

    pub fn is_valid(&self) -> bool {
        !self.text_en.trim().is_empty() && self.option_count() > 0
    }
}

fn option_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[(\[]?\s*([a-d])\s*[)\].:]\s*(.+)$").unwrap())
}

fn answer_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:answer|ans|सही\s*उत्तर|उत्तर)\s*([.:\-–])?\s*(?:[(\[]?\s*([a-d])\s*(?:[)\].,:]|\s|$))?\s*(.*)$",
        )
        .unwrap()
    })
}

fn explanation_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:(?:explanation|hint|solution|व्याख्या|स्पष्टीकरण)(?:\s*[.:\-–]\s*|\s+|$)|(?:संकेत|हल)\s*[.:\-–]\s*)(.*)$",
        )
        .unwrap()
    })
}

fn source_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:source|स्रोत)\s*[.:\-–]\s*(.+)$").unwrap())
}

fn difficulty_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:difficulty|कठिनाई)\s*[.:\-–]?\s*(easy|moderate|medium|difficult|hard|आसान|मध्यम|कठिन)",
        )
        .unwrap()
    })
}

/// True when Devanagari letters outnumber Latin letters.
pub fn is_devanagari(text: &str) -> bool {
    let (mut deva, mut latin) = (0usize, 0usize);
    for c in text.chars() {
        if ('\u{0900}'..='\u{097F}').contains(&c) {
            deva += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    deva > latin
}

/// Canonical difficulty tag: `easy`, `moderate` or `hard`.
pub fn normalize_difficulty(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "easy" | "आसान" => "easy",
        "difficult" | "hard" | "कठिन" => "hard",
        _ => "moderate",
    }
    .to_string()
}

fn push_joined(target: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

/// Append to whichever slot matches the script of `text`.
fn push_by_script(en: &mut String, hi: &mut String, text: &str) {
    if is_devanagari(text) {
        push_joined(hi, text);
    } else {
        push_joined(en, text);
    }
}

/// Build a draft from one span. Returns `None` when the result has no
/// question text or no option.
pub fn extract_fields(span: &ContentSpan) -> Option<DraftQuestion> {
    let mut draft = DraftQuestion {
        number: span.number,
        ..Default::default()
    };
    let mut answer_seen = false;
    let mut in_explanation = false;

    // The first line is question text whatever it looks like.
    let mut lines = span.lines.iter();
    if let Some(first) = lines.next() {
        push_by_script(&mut draft.text_en, &mut draft.text_hi, first);
    }

    for line in lines {
        if let Some(cap) = option_line().captures(line) {
            let letter = cap[1].chars().next().and_then(OptionLetter::from_char);
            if let Some(letter) = letter {
                let text = cap[2].trim();
                let i = letter.index();
                if draft.options_en[i].is_empty() {
                    draft.options_en[i] = text.to_string();
                } else if is_devanagari(text) && draft.options_hi[i].is_empty() {
                    draft.options_hi[i] = text.to_string();
                }
                continue;
            }
        }

        // A bare keyword with neither separator nor letter ("उत्तर प्रदेश")
        // is ordinary text.
        if let Some(cap) = answer_line()
            .captures(line)
            .filter(|cap| cap.get(1).is_some() || cap.get(2).is_some())
        {
            if !answer_seen {
                answer_seen = true;
                draft.answer = cap
                    .get(2)
                    .and_then(|m| m.as_str().chars().next())
                    .and_then(OptionLetter::from_char);

                let rest = cap.get(3).map(|m| m.as_str().trim()).unwrap_or("");
                if let Some(exp) = explanation_line().captures(rest) {
                    in_explanation = true;
                    push_by_script(&mut draft.explanation_en, &mut draft.explanation_hi, &exp[1]);
                } else if !rest.is_empty() {
                    push_by_script(&mut draft.explanation_en, &mut draft.explanation_hi, rest);
                }
            }
            continue;
        }

        if let Some(cap) = explanation_line().captures(line) {
            in_explanation = true;
            push_by_script(&mut draft.explanation_en, &mut draft.explanation_hi, &cap[1]);
            continue;
        }

        if let Some(cap) = source_line().captures(line) {
            draft.source = Some(cap[1].trim().to_string());
            continue;
        }

        if let Some(cap) = difficulty_line().captures(line) {
            draft.difficulty = Some(normalize_difficulty(&cap[1]));
            continue;
        }

        if draft.option_count() == 0 {
            push_by_script(&mut draft.text_en, &mut draft.text_hi, line);
        } else if answer_seen || in_explanation {
            push_by_script(&mut draft.explanation_en, &mut draft.explanation_hi, line);
        }
    }

    // Hindi-only questions keep their text in the primary slot.
    if draft.text_en.is_empty() {
        draft.text_en = std::mem::take(&mut draft.text_hi);
    }

    draft.is_valid().then_some(draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(number: u32, lines: &[&str]) -> ContentSpan {
        ContentSpan {
            number,
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_basic_question() {
        let draft = extract_fields(&span(
            1,
            &["What is X?", "a) A", "b) B", "c) C", "d) D", "Answer: b"],
        ))
        .unwrap();
        assert_eq!(draft.text_en, "What is X?");
        assert_eq!(draft.options_en, ["A", "B", "C", "D"].map(String::from));
        assert_eq!(draft.answer, Some(OptionLetter::B));
    }

    #[test]
    fn test_bracketed_options_and_answer() {
        let draft = extract_fields(&span(
            3,
            &[
                "Consider the following statements",
                "about the Preamble.",
                "(A) Only 1",
                "(B) Only 2",
                "Ans. (b) Both are correct because",
                "the Preamble is justiciable.",
            ],
        ))
        .unwrap();
        assert_eq!(
            draft.text_en,
            "Consider the following statements about the Preamble."
        );
        assert_eq!(draft.options_en[0], "Only 1");
        assert_eq!(draft.answer, Some(OptionLetter::B));
        assert_eq!(
            draft.explanation_en,
            "Both are correct because the Preamble is justiciable."
        );
    }

    #[test]
    fn test_only_first_answer_honoured() {
        let draft = extract_fields(&span(
            1,
            &["Pick one option", "a) x", "b) y", "Answer: a", "Answer: c"],
        ))
        .unwrap();
        assert_eq!(draft.answer, Some(OptionLetter::A));
    }

    #[test]
    fn test_answer_word_not_mistaken_for_letter() {
        let draft = extract_fields(&span(
            1,
            &["Pick one option", "a) x", "Answer: because it rains"],
        ))
        .unwrap();
        assert_eq!(draft.answer, None);
        assert_eq!(draft.explanation_en, "because it rains");
    }

    #[test]
    fn test_explanation_keywords_and_source() {
        let draft = extract_fields(&span(
            7,
            &[
                "Who founded the Servants of India Society?",
                "a) Gokhale",
                "b) Tilak",
                "Answer: (a)",
                "Explanation: Founded in 1905 by Gokhale.",
                "It trained national missionaries.",
                "Source: NCERT Modern India",
                "Difficulty: Hard",
            ],
        ))
        .unwrap();
        assert_eq!(
            draft.explanation_en,
            "Founded in 1905 by Gokhale. It trained national missionaries."
        );
        assert_eq!(draft.source.as_deref(), Some("NCERT Modern India"));
        assert_eq!(draft.difficulty.as_deref(), Some("hard"));
    }

    #[test]
    fn test_hindi_lines_routed_to_hindi_fields() {
        let draft = extract_fields(&span(
            2,
            &[
                "Which is the largest state by area?",
                "क्षेत्रफल की दृष्टि से सबसे बड़ा राज्य कौन सा है?",
                "a) Rajasthan",
                "a) राजस्थान",
                "b) Madhya Pradesh",
                "उत्तर: a",
                "व्याख्या: राजस्थान सबसे बड़ा राज्य है।",
            ],
        ))
        .unwrap();
        assert_eq!(
            draft.text_hi,
            "क्षेत्रफल की दृष्टि से सबसे बड़ा राज्य कौन सा है?"
        );
        assert_eq!(draft.options_en[0], "Rajasthan");
        assert_eq!(draft.options_hi[0], "राजस्थान");
        assert_eq!(draft.answer, Some(OptionLetter::A));
        assert_eq!(draft.explanation_hi, "राजस्थान सबसे बड़ा राज्य है।");
        assert!(draft.explanation_en.is_empty());
    }

    #[test]
    fn test_hindi_place_name_is_not_answer() {
        let draft = extract_fields(&span(
            4,
            &["राजधानी कौन सी है?", "उत्तर प्रदेश की राजधानी", "a) लखनऊ"],
        ))
        .unwrap();
        assert_eq!(draft.answer, None);
        assert_eq!(draft.text_en, "राजधानी कौन सी है? उत्तर प्रदेश की राजधानी");
        assert!(draft.text_hi.is_empty());
    }

    #[test]
    fn test_hindi_first_question_text() {
        let draft = extract_fields(&span(
            6,
            &[
                "भारत की राजधानी क्या है?",
                "What is the capital of India?",
                "a) New Delhi",
                "b) Mumbai",
            ],
        ))
        .unwrap();
        assert_eq!(draft.text_en, "What is the capital of India?");
        assert_eq!(draft.text_hi, "भारत की राजधानी क्या है?");
    }

    #[test]
    fn test_answer_letter_followed_by_comma() {
        let draft = extract_fields(&span(
            1,
            &["Pick one option", "a) x", "b) y", "Answer: B, because y holds"],
        ))
        .unwrap();
        assert_eq!(draft.answer, Some(OptionLetter::B));
        assert_eq!(draft.explanation_en, "because y holds");

        let draft = extract_fields(&span(1, &["Pick one option", "a) x", "Ans: a: x is right"]))
            .unwrap();
        assert_eq!(draft.answer, Some(OptionLetter::A));
    }

    #[test]
    fn test_keyword_prefix_inside_word_is_text() {
        let draft = extract_fields(&span(
            5,
            &["Which region is described?", "Hinterland of the port", "a) x"],
        ))
        .unwrap();
        assert!(draft.text_en.ends_with("Hinterland of the port"));
        assert!(draft.explanation_en.is_empty());
    }

    #[test]
    fn test_unclassifiable_line_dropped() {
        let draft = extract_fields(&span(
            1,
            &["Pick one option", "a) x", "continued option text"],
        ))
        .unwrap();
        assert!(draft.explanation_en.is_empty());
        assert_eq!(draft.text_en, "Pick one option");
    }

    #[test]
    fn test_invalid_without_options() {
        assert!(extract_fields(&span(1, &["Header text only", "more text"])).is_none());
        assert!(extract_fields(&span(1, &[])).is_none());
    }
}
