//! Canonical platform records and the question-bank import/export format.
//!
//! Records are stored as-is in every backend (JSON documents in the key-value
//! store, rows in the relational store), so field names here are the storage
//! field names.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a fresh record identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// One of the four answer choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionLetter {
    #[serde(alias = "A")]
    A,
    #[serde(alias = "B")]
    B,
    #[serde(alias = "C")]
    C,
    #[serde(alias = "D")]
    D,
}

impl OptionLetter {
    /// Parse a single letter, case-insensitive.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'a' => Some(Self::A),
            'b' => Some(Self::B),
            'c' => Some(Self::C),
            'd' => Some(Self::D),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::from_char(c)
    }

    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }
}

pub const DEFAULT_DIFFICULTY: &str = "moderate";

fn default_difficulty() -> String {
    DEFAULT_DIFFICULTY.to_string()
}

fn default_true() -> bool {
    true
}

/// Accept `null` where an empty string is meant.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Questions and tests
// ============================================================================

/// A single multiple-choice question owned by a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub test_id: String,
    pub question_number: u32,
    pub question_text_en: String,
    #[serde(default)]
    pub question_text_hi: Option<String>,
    #[serde(default)]
    pub option_a_en: String,
    #[serde(default)]
    pub option_b_en: String,
    #[serde(default)]
    pub option_c_en: String,
    #[serde(default)]
    pub option_d_en: String,
    #[serde(default)]
    pub option_a_hi: Option<String>,
    #[serde(default)]
    pub option_b_hi: Option<String>,
    #[serde(default)]
    pub option_c_hi: Option<String>,
    #[serde(default)]
    pub option_d_hi: Option<String>,
    /// `None` when no answer was detected; never silently `a`.
    #[serde(default)]
    pub correct_option: Option<OptionLetter>,
    #[serde(default)]
    pub explanation_en: String,
    #[serde(default)]
    pub explanation_hi: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Active,
    Draft,
}

fn default_status() -> TestStatus {
    TestStatus::Active
}

fn default_mark_correct() -> f64 {
    2.0
}

fn default_mark_wrong() -> f64 {
    -0.66
}

/// A timed mock test. `total_questions` is derived from its question records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockTest {
    pub id: String,
    pub title_en: String,
    #[serde(default)]
    pub title_hi: Option<String>,
    #[serde(default)]
    pub subject: String,
    pub time_limit_minutes: u32,
    #[serde(default = "default_mark_correct")]
    pub mark_correct: f64,
    #[serde(default = "default_mark_wrong")]
    pub mark_wrong: f64,
    #[serde(default = "default_status")]
    pub status: TestStatus,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Admin input for creating or editing a test.
#[derive(Debug, Clone, Deserialize)]
pub struct TestInput {
    pub title_en: String,
    #[serde(default)]
    pub title_hi: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    #[serde(default)]
    pub mark_correct: Option<f64>,
    #[serde(default)]
    pub mark_wrong: Option<f64>,
    #[serde(default)]
    pub status: Option<TestStatus>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

/// Admin input for creating or editing a question. Numbering is owned by the
/// platform, so no `question_number` here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionInput {
    pub question_text_en: String,
    #[serde(default)]
    pub question_text_hi: Option<String>,
    #[serde(default)]
    pub option_a_en: String,
    #[serde(default)]
    pub option_b_en: String,
    #[serde(default)]
    pub option_c_en: String,
    #[serde(default)]
    pub option_d_en: String,
    #[serde(default)]
    pub option_a_hi: Option<String>,
    #[serde(default)]
    pub option_b_hi: Option<String>,
    #[serde(default)]
    pub option_c_hi: Option<String>,
    #[serde(default)]
    pub option_d_hi: Option<String>,
    #[serde(default)]
    pub correct_option: Option<OptionLetter>,
    #[serde(default)]
    pub explanation_en: String,
    #[serde(default)]
    pub explanation_hi: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

impl QuestionInput {
    pub fn into_question(self, id: String, test_id: String, question_number: u32) -> Question {
        Question {
            id,
            test_id,
            question_number,
            question_text_en: self.question_text_en,
            question_text_hi: self.question_text_hi,
            option_a_en: self.option_a_en,
            option_b_en: self.option_b_en,
            option_c_en: self.option_c_en,
            option_d_en: self.option_d_en,
            option_a_hi: self.option_a_hi,
            option_b_hi: self.option_b_hi,
            option_c_hi: self.option_c_hi,
            option_d_hi: self.option_d_hi,
            correct_option: self.correct_option,
            explanation_en: self.explanation_en,
            explanation_hi: self.explanation_hi,
            source: self.source,
            difficulty: self.difficulty.unwrap_or_else(default_difficulty),
        }
    }
}

// ============================================================================
// Question-bank JSON (import/export format)
// ============================================================================

/// Portable question bank, as written by the extractor and read by the
/// admin import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBank {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title_en: String,
    #[serde(default)]
    pub title_hi: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub total_questions: u32,
    pub time_limit_minutes: u32,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// ISO-8601; naive timestamps are accepted and read as UTC.
    pub created_at: String,
    pub questions: Vec<BankQuestion>,
}

/// One question in the bank format. `correct_option` is always a letter on
/// the wire; `answer_detected = false` marks a defaulted `a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankQuestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question_number: u32,
    pub question_text_en: String,
    #[serde(default)]
    pub question_text_hi: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub option_a_en: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub option_b_en: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub option_c_en: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub option_d_en: String,
    #[serde(default)]
    pub option_a_hi: Option<String>,
    #[serde(default)]
    pub option_b_hi: Option<String>,
    #[serde(default)]
    pub option_c_hi: Option<String>,
    #[serde(default)]
    pub option_d_hi: Option<String>,
    pub correct_option: OptionLetter,
    #[serde(default = "default_true")]
    pub answer_detected: bool,
    #[serde(default, deserialize_with = "nullable_string")]
    pub explanation_en: String,
    #[serde(default)]
    pub explanation_hi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

impl BankQuestion {
    pub fn from_question(q: &Question) -> Self {
        Self {
            id: Some(q.id.clone()),
            question_number: q.question_number,
            question_text_en: q.question_text_en.clone(),
            question_text_hi: q.question_text_hi.clone(),
            option_a_en: q.option_a_en.clone(),
            option_b_en: q.option_b_en.clone(),
            option_c_en: q.option_c_en.clone(),
            option_d_en: q.option_d_en.clone(),
            option_a_hi: q.option_a_hi.clone(),
            option_b_hi: q.option_b_hi.clone(),
            option_c_hi: q.option_c_hi.clone(),
            option_d_hi: q.option_d_hi.clone(),
            correct_option: q.correct_option.unwrap_or(OptionLetter::A),
            answer_detected: q.correct_option.is_some(),
            explanation_en: q.explanation_en.clone(),
            explanation_hi: q.explanation_hi.clone(),
            source: q.source.clone(),
            difficulty: q.difficulty.clone(),
        }
    }

    pub fn into_question(self, test_id: &str) -> Question {
        Question {
            id: self.id.unwrap_or_else(new_id),
            test_id: test_id.to_string(),
            question_number: self.question_number,
            question_text_en: self.question_text_en,
            question_text_hi: self.question_text_hi,
            option_a_en: self.option_a_en,
            option_b_en: self.option_b_en,
            option_c_en: self.option_c_en,
            option_d_en: self.option_d_en,
            option_a_hi: self.option_a_hi,
            option_b_hi: self.option_b_hi,
            option_c_hi: self.option_c_hi,
            option_d_hi: self.option_d_hi,
            correct_option: self.answer_detected.then_some(self.correct_option),
            explanation_en: self.explanation_en,
            explanation_hi: self.explanation_hi,
            source: self.source,
            difficulty: self.difficulty,
        }
    }
}

/// Parse an ISO-8601 timestamp, with or without offset.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Access keys, results, notifications
// ============================================================================

/// Shared-secret code gating student access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub code: String,
    /// Absent counts as active; only an explicit `false` disables the key.
    #[serde(default)]
    pub is_active: Option<bool>,
    pub created_at: DateTime<Utc>,
    /// Stored for display only; validation does not enforce it.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl AccessKey {
    pub fn is_enabled(&self) -> bool {
        self.is_active != Some(false)
    }
}

/// Validity predicate: an entry with exactly this code exists and is enabled.
pub fn access_key_matches(keys: &[AccessKey], code: &str) -> bool {
    keys.iter().any(|k| k.code == code && k.is_enabled())
}

/// Admin input for a new access key. A code is generated when none is given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessKeyInput {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// One submitted attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub user_name: String,
    pub correct: u32,
    #[serde(default)]
    pub wrong: u32,
    #[serde(default)]
    pub unattempted: u32,
    pub score: f64,
    pub time_taken_secs: u64,
    pub submitted_at: DateTime<Utc>,
}

/// A student's answer sheet: question id → chosen option.
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptInput {
    pub user_name: String,
    #[serde(default)]
    pub answers: HashMap<String, OptionLetter>,
    pub time_taken_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Urgent,
}

fn default_severity() -> Severity {
    Severity::Info
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationInput {
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Active flag set and not yet expired.
    pub fn is_displayable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Active notifications, newest first.
pub fn displayable_notifications(
    mut notifications: Vec<Notification>,
    now: DateTime<Utc>,
) -> Vec<Notification> {
    notifications.retain(|n| n.is_displayable(now));
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    notifications
}

// ============================================================================
// Current affairs and subjects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Articles collected for one calendar day, keyed `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAffairsDigest {
    pub date: String,
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}
