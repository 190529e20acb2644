//! Schema normalizer: drafts → canonical question bank.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::config::ParserConfig;
use crate::parser::DraftQuestion;
use crate::schema::{
    new_id, BankQuestion, MockTest, OptionLetter, Question, QuestionBank, DEFAULT_DIFFICULTY,
};

/// Caller-supplied bank metadata.
#[derive(Debug, Clone, Default)]
pub struct BankMeta {
    pub title_en: String,
    pub title_hi: Option<String>,
    pub subject: String,
    /// Overrides the computed time limit.
    pub time_limit_minutes: Option<u32>,
    pub source: Option<String>,
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

fn draft_to_bank_question(draft: DraftQuestion, number: u32) -> BankQuestion {
    let [a_en, b_en, c_en, d_en] = draft.options_en;
    let [a_hi, b_hi, c_hi, d_hi] = draft.options_hi;

    BankQuestion {
        id: Some(new_id()),
        question_number: number,
        question_text_en: draft.text_en,
        question_text_hi: non_empty(draft.text_hi),
        option_a_en: a_en,
        option_b_en: b_en,
        option_c_en: c_en,
        option_d_en: d_en,
        option_a_hi: non_empty(a_hi),
        option_b_hi: non_empty(b_hi),
        option_c_hi: non_empty(c_hi),
        option_d_hi: non_empty(d_hi),
        correct_option: draft.answer.unwrap_or(OptionLetter::A),
        answer_detected: draft.answer.is_some(),
        explanation_en: draft.explanation_en,
        explanation_hi: non_empty(draft.explanation_hi),
        source: draft.source.and_then(non_empty),
        difficulty: draft
            .difficulty
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string()),
    }
}

/// Most common value; ties go to the value seen first.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (i, v) in values.enumerate() {
        counts.entry(v).or_insert((0, i)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(v, _)| v.to_string())
}

/// Renumber drafts 1..N in order and fill every canonical default.
pub fn build_bank(drafts: Vec<DraftQuestion>, meta: BankMeta, config: &ParserConfig) -> QuestionBank {
    let questions: Vec<BankQuestion> = drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| draft_to_bank_question(d, i as u32 + 1))
        .collect();

    let undetected = questions.iter().filter(|q| !q.answer_detected).count();
    if undetected > 0 {
        debug!("{} questions have no detected answer", undetected);
    }

    let difficulty = most_common(questions.iter().map(|q| q.difficulty.as_str()))
        .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string());
    let source = meta
        .source
        .or_else(|| questions.iter().find_map(|q| q.source.clone()));

    QuestionBank {
        id: Some(new_id()),
        title_en: meta.title_en,
        title_hi: meta.title_hi,
        subject: meta.subject,
        total_questions: questions.len() as u32,
        time_limit_minutes: meta
            .time_limit_minutes
            .unwrap_or_else(|| config.time_limit_for(questions.len())),
        difficulty,
        source,
        created_at: Utc::now().to_rfc3339(),
        questions,
    }
}

/// Bank view of a stored test and its questions.
pub fn export_bank(test: &MockTest, questions: &[Question]) -> QuestionBank {
    let mut sorted: Vec<&Question> = questions.iter().collect();
    sorted.sort_by_key(|q| q.question_number);

    QuestionBank {
        id: Some(test.id.clone()),
        title_en: test.title_en.clone(),
        title_hi: test.title_hi.clone(),
        subject: test.subject.clone(),
        total_questions: sorted.len() as u32,
        time_limit_minutes: test.time_limit_minutes,
        difficulty: test.difficulty.clone(),
        source: test.source.clone(),
        created_at: test.created_at.to_rfc3339(),
        questions: sorted.into_iter().map(BankQuestion::from_question).collect(),
    }
}
