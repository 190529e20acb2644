//! Platform operations over a primary store and an optional mirror.
//!
//! The primary store is the source of truth. Every write goes to the primary
//! first; a mirror write that fails marks the record provisional instead of
//! failing the operation, and `sync` replays provisional records later.
//!
//! Student-facing reads (test list, leaderboard, notifications, key checks)
//! log backend failures and return an empty result. Admin operations return
//! errors.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::bank;
use crate::config::{ParserConfig, Settings};
use crate::error::PlatformError;
use crate::schema::{
    access_key_matches, displayable_notifications, new_id, parse_timestamp, AccessKey,
    AccessKeyInput, AttemptInput, CurrentAffairsDigest, MockTest, Notification,
    NotificationInput, OptionLetter, Question, QuestionBank, QuestionInput, Subject, TestInput,
    TestResult, TestStatus, DEFAULT_DIFFICULTY,
};
use crate::store::{open_store, RecordRef, RecordStore};

/// One write, applied first to the primary and then to the mirror.
enum Change<'a> {
    Test(&'a MockTest),
    Question(&'a Question),
    AccessKey(&'a AccessKey),
    Result(&'a TestResult),
    Notification(&'a Notification),
    CurrentAffairs(&'a CurrentAffairsDigest),
    Subject(&'a Subject),
    /// Deleting a test also deletes its questions.
    Delete(RecordRef),
}

impl Change<'_> {
    fn record(&self) -> RecordRef {
        match self {
            Change::Test(t) => RecordRef::Test { id: t.id.clone() },
            Change::Question(q) => RecordRef::Question {
                test_id: q.test_id.clone(),
                id: q.id.clone(),
            },
            Change::AccessKey(k) => RecordRef::AccessKey { id: k.id.clone() },
            Change::Result(r) => RecordRef::Result {
                test_id: r.test_id.clone(),
                id: r.id.clone(),
            },
            Change::Notification(n) => RecordRef::Notification { id: n.id.clone() },
            Change::CurrentAffairs(d) => RecordRef::CurrentAffairs {
                date: d.date.clone(),
            },
            Change::Subject(s) => RecordRef::Subject { id: s.id.clone() },
            Change::Delete(record) => record.clone(),
        }
    }
}

async fn apply(store: &dyn RecordStore, change: &Change<'_>) -> Result<()> {
    match change {
        Change::Test(t) => store.put_test(t).await,
        Change::Question(q) => store.put_question(q).await,
        Change::AccessKey(k) => store.put_access_key(k).await,
        Change::Result(r) => store.put_result(r).await,
        Change::Notification(n) => store.put_notification(n).await,
        Change::CurrentAffairs(d) => store.put_current_affairs(d).await,
        Change::Subject(s) => store.put_subject(s).await,
        Change::Delete(record) => match record {
            RecordRef::Test { id } => {
                store.delete_questions(id).await?;
                store.delete_test(id).await
            }
            RecordRef::Question { test_id, id } => store.delete_question(test_id, id).await,
            RecordRef::AccessKey { id } => store.delete_access_key(id).await,
            RecordRef::Notification { id } => store.delete_notification(id).await,
            other => anyhow::bail!("{} cannot be deleted", other),
        },
    }
}

/// Leaderboard row; `rank` is 1-based and computed on read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    #[serde(flatten)]
    pub result: TestResult,
}

/// Order by correct answers (desc), then time taken (asc), then submission
/// time, and assign ranks 1..N.
pub fn rank_results(mut results: Vec<TestResult>) -> Vec<LeaderboardEntry> {
    results.sort_by(|a, b| {
        b.correct
            .cmp(&a.correct)
            .then(a.time_taken_secs.cmp(&b.time_taken_secs))
            .then(a.submitted_at.cmp(&b.submitted_at))
    });
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| LeaderboardEntry {
            rank: i as u32 + 1,
            result,
        })
        .collect()
}

/// Digests for the seven days ending at `end`, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub start: String,
    pub end: String,
    pub days: Vec<CurrentAffairsDigest>,
    pub total_articles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub record: RecordRef,
    pub error: String,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub mirror: Option<String>,
    /// Provisional records replayed successfully.
    pub retried: usize,
    /// Records written to the mirror because they were missing or differed.
    pub pushed: usize,
    pub unchanged: usize,
    /// Records whose mirror copy differed from the primary before overwrite.
    pub conflicts: Vec<RecordRef>,
    /// Records present only in the mirror. Left in place.
    pub mirror_only: Vec<RecordRef>,
    pub failed: Vec<SyncFailure>,
}

/// Date key used by the current-affairs store.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn parse_date_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

fn generate_code() -> String {
    new_id().replace('-', "")[..8].to_uppercase()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Record ids end up in REST paths and query filters, so only plain
/// identifier characters are allowed.
fn check_id(id: &str) -> Result<(), PlatformError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PlatformError::Invalid(format!("malformed id {:?}", id)))
    }
}

fn sorted_questions(mut questions: Vec<Question>) -> Vec<Question> {
    questions.sort_by_key(|q| q.question_number);
    questions
}

/// The platform context, built once at start-up and shared by the HTTP
/// handlers and the CLI.
#[derive(Clone)]
pub struct Platform {
    primary: Arc<dyn RecordStore>,
    mirror: Option<Arc<dyn RecordStore>>,
    provisional: Arc<RwLock<BTreeSet<RecordRef>>>,
    parser: ParserConfig,
}

impl Platform {
    pub fn new(
        primary: Arc<dyn RecordStore>,
        mirror: Option<Arc<dyn RecordStore>>,
        parser: ParserConfig,
    ) -> Self {
        Self {
            primary,
            mirror,
            provisional: Arc::new(RwLock::new(BTreeSet::new())),
            parser,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let primary = open_store(settings.primary, settings)?;
        let mirror = settings
            .mirror
            .map(|kind| open_store(kind, settings))
            .transpose()?;

        info!(
            "Platform stores: primary={}, mirror={}",
            primary.name(),
            mirror.as_ref().map(|m| m.name()).unwrap_or("none")
        );
        Ok(Self::new(primary, mirror, settings.parser.clone()))
    }

    pub fn parser_config(&self) -> &ParserConfig {
        &self.parser
    }

    /// Records whose last mirror write failed.
    pub fn pending_sync(&self) -> Vec<RecordRef> {
        self.provisional_set().iter().cloned().collect()
    }

    /// The set only ever holds whole inserts and removes, so a poisoned
    /// lock still guards consistent data.
    fn provisional_set(&self) -> RwLockWriteGuard<'_, BTreeSet<RecordRef>> {
        self.provisional
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Primary first, then mirror. Only a primary failure is an error.
    async fn write(&self, change: Change<'_>) -> Result<(), PlatformError> {
        apply(self.primary.as_ref(), &change).await?;

        if let Some(mirror) = &self.mirror {
            let record = change.record();
            match apply(mirror.as_ref(), &change).await {
                Ok(()) => {
                    self.provisional_set().remove(&record);
                }
                Err(e) => {
                    warn!(
                        "Mirror write to {} failed for {}, marked provisional: {:#}",
                        mirror.name(),
                        record,
                        e
                    );
                    self.provisional_set().insert(record);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Tests
    // ========================================================================

    /// Tests, newest first. Drafts are hidden unless asked for.
    pub async fn list_tests(&self, include_drafts: bool) -> Vec<MockTest> {
        let mut tests = match self.primary.list_tests().await {
            Ok(tests) => tests,
            Err(e) => {
                warn!("Failed to list tests: {:#}", e);
                return Vec::new();
            }
        };
        if !include_drafts {
            tests.retain(|t| t.status == TestStatus::Active);
        }
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tests
    }

    pub async fn get_test(&self, id: &str) -> Result<MockTest, PlatformError> {
        check_id(id)?;
        self.primary
            .get_test(id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("test {}", id)))
    }

    pub async fn create_test(&self, input: TestInput) -> Result<MockTest, PlatformError> {
        if input.title_en.trim().is_empty() {
            return Err(PlatformError::Invalid("title_en is required".to_string()));
        }

        let test = MockTest {
            id: new_id(),
            title_en: input.title_en.trim().to_string(),
            title_hi: input.title_hi,
            subject: input.subject,
            time_limit_minutes: input
                .time_limit_minutes
                .unwrap_or_else(|| self.parser.time_limit_for(0)),
            mark_correct: input.mark_correct.unwrap_or(2.0),
            mark_wrong: input.mark_wrong.unwrap_or(-0.66),
            status: input.status.unwrap_or(TestStatus::Active),
            total_questions: 0,
            difficulty: input
                .difficulty
                .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string()),
            source: None,
            created_at: Utc::now(),
        };

        self.write(Change::Test(&test)).await?;
        info!("Created test {} ({})", test.id, test.title_en);
        Ok(test)
    }

    pub async fn update_test(&self, id: &str, input: TestInput) -> Result<MockTest, PlatformError> {
        if input.title_en.trim().is_empty() {
            return Err(PlatformError::Invalid("title_en is required".to_string()));
        }

        let mut test = self.get_test(id).await?;
        test.title_en = input.title_en.trim().to_string();
        test.title_hi = input.title_hi;
        test.subject = input.subject;
        if let Some(minutes) = input.time_limit_minutes {
            test.time_limit_minutes = minutes;
        }
        if let Some(mark) = input.mark_correct {
            test.mark_correct = mark;
        }
        if let Some(mark) = input.mark_wrong {
            test.mark_wrong = mark;
        }
        if let Some(status) = input.status {
            test.status = status;
        }
        if let Some(difficulty) = input.difficulty {
            test.difficulty = difficulty;
        }

        self.write(Change::Test(&test)).await?;
        Ok(test)
    }

    /// Delete a test and every question it owns.
    pub async fn delete_test(&self, id: &str) -> Result<(), PlatformError> {
        self.get_test(id).await?;
        self.write(Change::Delete(RecordRef::Test { id: id.to_string() }))
            .await?;
        info!("Deleted test {} and its questions", id);
        Ok(())
    }

    // ========================================================================
    // Questions
    // ========================================================================

    /// Questions of a test, ordered by number.
    pub async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>, PlatformError> {
        check_id(test_id)?;
        Ok(sorted_questions(self.primary.list_questions(test_id).await?))
    }

    async fn set_total(&self, mut test: MockTest, total: u32) -> Result<(), PlatformError> {
        if test.total_questions != total {
            test.total_questions = total;
            self.write(Change::Test(&test)).await?;
        }
        Ok(())
    }

    /// Append a question as number N+1.
    pub async fn add_question(
        &self,
        test_id: &str,
        input: QuestionInput,
    ) -> Result<Question, PlatformError> {
        validate_question(&input)?;
        let test = self.get_test(test_id).await?;
        let count = self.primary.list_questions(test_id).await?.len() as u32;

        let question = input.into_question(new_id(), test_id.to_string(), count + 1);
        self.write(Change::Question(&question)).await?;
        self.set_total(test, count + 1).await?;

        debug!("Added question {} to test {}", question.question_number, test_id);
        Ok(question)
    }

    /// Replace a question's content. Its number is kept.
    pub async fn update_question(
        &self,
        test_id: &str,
        question_id: &str,
        input: QuestionInput,
    ) -> Result<Question, PlatformError> {
        validate_question(&input)?;
        check_id(test_id)?;
        check_id(question_id)?;
        let existing = self
            .primary
            .list_questions(test_id)
            .await?
            .into_iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| PlatformError::NotFound(format!("question {}", question_id)))?;

        let question = input.into_question(
            existing.id,
            existing.test_id,
            existing.question_number,
        );
        self.write(Change::Question(&question)).await?;
        Ok(question)
    }

    /// Delete a question, renumber the rest 1..N and update the test total.
    pub async fn delete_question(&self, test_id: &str, question_id: &str) -> Result<(), PlatformError> {
        let test = self.get_test(test_id).await?;
        let questions = self.list_questions(test_id).await?;
        if !questions.iter().any(|q| q.id == question_id) {
            return Err(PlatformError::NotFound(format!("question {}", question_id)));
        }

        self.write(Change::Delete(RecordRef::Question {
            test_id: test_id.to_string(),
            id: question_id.to_string(),
        }))
        .await?;

        let remaining: Vec<Question> = questions.into_iter().filter(|q| q.id != question_id).collect();
        for (i, mut question) in remaining.iter().cloned().enumerate() {
            let number = i as u32 + 1;
            if question.question_number != number {
                question.question_number = number;
                self.write(Change::Question(&question)).await?;
            }
        }

        self.set_total(test, remaining.len() as u32).await?;
        info!(
            "Deleted question {} from test {}, {} remain",
            question_id,
            test_id,
            remaining.len()
        );
        Ok(())
    }

    // ========================================================================
    // Question banks
    // ========================================================================

    /// Create a new test from a bank. Questions get fresh ids and are
    /// renumbered 1..N in their bank order.
    pub async fn import_bank(&self, bank: QuestionBank) -> Result<MockTest, PlatformError> {
        if bank.title_en.trim().is_empty() {
            return Err(PlatformError::Invalid("bank title_en is required".to_string()));
        }
        if bank.questions.is_empty() {
            return Err(PlatformError::Invalid("bank has no questions".to_string()));
        }

        let mut bank_questions = bank.questions;
        bank_questions.sort_by_key(|q| q.question_number);

        let test = MockTest {
            id: new_id(),
            title_en: bank.title_en,
            title_hi: bank.title_hi,
            subject: bank.subject,
            time_limit_minutes: bank.time_limit_minutes,
            mark_correct: 2.0,
            mark_wrong: -0.66,
            status: TestStatus::Active,
            total_questions: bank_questions.len() as u32,
            difficulty: bank.difficulty,
            source: bank.source,
            created_at: parse_timestamp(&bank.created_at).unwrap_or_else(Utc::now),
        };
        self.write(Change::Test(&test)).await?;

        for (i, mut bank_question) in bank_questions.into_iter().enumerate() {
            bank_question.id = None;
            bank_question.question_number = i as u32 + 1;
            let question = bank_question.into_question(&test.id);
            if let Err(e) = self.write(Change::Question(&question)).await {
                self.roll_back_import(&test.id, i).await;
                return Err(e);
            }
        }

        info!(
            "Imported bank '{}' as test {} ({} questions)",
            test.title_en, test.id, test.total_questions
        );
        Ok(test)
    }

    /// Remove a partially imported test so no test claims questions that
    /// were never stored.
    async fn roll_back_import(&self, test_id: &str, written: usize) {
        warn!(
            "Import into test {} failed after {} questions, rolling back",
            test_id, written
        );
        let record = RecordRef::Test {
            id: test_id.to_string(),
        };
        if let Err(e) = self.write(Change::Delete(record)).await {
            warn!("Rollback of test {} failed: {}", test_id, e);
        }
    }

    pub async fn export_bank(&self, test_id: &str) -> Result<QuestionBank, PlatformError> {
        let test = self.get_test(test_id).await?;
        let questions = self.primary.list_questions(test_id).await?;
        Ok(bank::export_bank(&test, &questions))
    }

    // ========================================================================
    // Access keys
    // ========================================================================

    pub async fn list_access_keys(&self) -> Result<Vec<AccessKey>, PlatformError> {
        let mut keys = self.primary.list_access_keys().await?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    pub async fn create_access_key(&self, input: AccessKeyInput) -> Result<AccessKey, PlatformError> {
        let keys = self.primary.list_access_keys().await?;

        let code = match input.code.map(|c| c.trim().to_string()) {
            Some(code) if code.is_empty() => {
                return Err(PlatformError::Invalid("access key code is empty".to_string()))
            }
            Some(code) => code,
            None => loop {
                let code = generate_code();
                if !keys.iter().any(|k| k.code == code) {
                    break code;
                }
            },
        };

        if keys.iter().any(|k| k.code == code) {
            return Err(PlatformError::Conflict(format!(
                "access key {} already exists",
                code
            )));
        }

        let key = AccessKey {
            id: new_id(),
            code,
            is_active: Some(true),
            created_at: Utc::now(),
            expires_at: input.expires_at,
            usage_count: 0,
            last_used_at: None,
            note: input.note,
        };
        self.write(Change::AccessKey(&key)).await?;
        info!("Created access key {}", key.id);
        Ok(key)
    }

    pub async fn set_access_key_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<AccessKey, PlatformError> {
        check_id(id)?;
        let mut key = self
            .primary
            .list_access_keys()
            .await?
            .into_iter()
            .find(|k| k.id == id)
            .ok_or_else(|| PlatformError::NotFound(format!("access key {}", id)))?;

        key.is_active = Some(active);
        self.write(Change::AccessKey(&key)).await?;
        Ok(key)
    }

    pub async fn delete_access_key(&self, id: &str) -> Result<(), PlatformError> {
        check_id(id)?;
        let keys = self.primary.list_access_keys().await?;
        if !keys.iter().any(|k| k.id == id) {
            return Err(PlatformError::NotFound(format!("access key {}", id)));
        }
        self.write(Change::Delete(RecordRef::AccessKey { id: id.to_string() }))
            .await
    }

    /// True when an enabled key with exactly this code exists. A successful
    /// check bumps the key's usage counters; failures to record usage are
    /// logged and do not affect the answer.
    pub async fn validate_access_key(&self, code: &str) -> bool {
        let keys = match self.primary.list_access_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Access key lookup failed: {:#}", e);
                return false;
            }
        };

        if !access_key_matches(&keys, code) {
            return false;
        }

        if let Some(mut key) = keys.into_iter().find(|k| k.code == code && k.is_enabled()) {
            key.usage_count += 1;
            key.last_used_at = Some(Utc::now());
            if let Err(e) = self.write(Change::AccessKey(&key)).await {
                warn!("Failed to record usage of access key {}: {}", key.id, e);
            }
        }
        true
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Grade an answer sheet against the test's questions and store the
    /// result. Questions without a known answer are not scored.
    pub async fn submit_attempt(
        &self,
        test_id: &str,
        attempt: AttemptInput,
    ) -> Result<TestResult, PlatformError> {
        let user_name = attempt.user_name.trim().to_string();
        if user_name.is_empty() {
            return Err(PlatformError::Invalid("user_name is required".to_string()));
        }

        let test = self.get_test(test_id).await?;
        let questions = self.primary.list_questions(test_id).await?;
        let result = grade(&test, &questions, &attempt.answers, user_name, attempt.time_taken_secs);

        self.write(Change::Result(&result)).await?;
        info!(
            "Result {} for test {}: {} correct, score {}",
            result.id, test_id, result.correct, result.score
        );
        Ok(result)
    }

    pub async fn leaderboard(&self, test_id: &str) -> Vec<LeaderboardEntry> {
        if check_id(test_id).is_err() {
            return Vec::new();
        }
        match self.primary.list_results(test_id).await {
            Ok(results) => rank_results(results),
            Err(e) => {
                warn!("Failed to load results for {}: {:#}", test_id, e);
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    pub async fn create_notification(
        &self,
        input: NotificationInput,
    ) -> Result<Notification, PlatformError> {
        if input.title.trim().is_empty() {
            return Err(PlatformError::Invalid("title is required".to_string()));
        }

        let notification = Notification {
            id: new_id(),
            title: input.title.trim().to_string(),
            message: input.message,
            severity: input.severity,
            created_at: Utc::now(),
            expires_at: input.expires_at,
            is_active: true,
        };
        self.write(Change::Notification(&notification)).await?;
        Ok(notification)
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), PlatformError> {
        check_id(id)?;
        let notifications = self.primary.list_notifications().await?;
        if !notifications.iter().any(|n| n.id == id) {
            return Err(PlatformError::NotFound(format!("notification {}", id)));
        }
        self.write(Change::Delete(RecordRef::Notification { id: id.to_string() }))
            .await
    }

    /// Active, unexpired notifications, newest first.
    pub async fn active_notifications(&self, now: DateTime<Utc>) -> Vec<Notification> {
        match self.primary.list_notifications().await {
            Ok(all) => displayable_notifications(all, now),
            Err(e) => {
                warn!("Failed to load notifications: {:#}", e);
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Current affairs and subjects
    // ========================================================================

    pub async fn current_affairs(&self, date: NaiveDate) -> Option<CurrentAffairsDigest> {
        let key = date_key(date);
        match self.primary.get_current_affairs(&key).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to load current affairs for {}: {:#}", key, e);
                None
            }
        }
    }

    pub async fn put_current_affairs(
        &self,
        date: NaiveDate,
        mut digest: CurrentAffairsDigest,
    ) -> Result<CurrentAffairsDigest, PlatformError> {
        digest.date = date_key(date);
        self.write(Change::CurrentAffairs(&digest)).await?;
        Ok(digest)
    }

    /// One lookup per day, in order, for the week ending at `end`.
    pub async fn weekly_summary(&self, end: NaiveDate) -> WeeklySummary {
        let start = end - Duration::days(6);
        let mut days = Vec::new();

        for offset in 0..7 {
            let date = start + Duration::days(offset);
            if let Some(digest) = self.current_affairs(date).await {
                days.push(digest);
            }
        }

        WeeklySummary {
            start: date_key(start),
            end: date_key(end),
            total_articles: days.iter().map(|d| d.articles.len()).sum(),
            days,
        }
    }

    /// Active subjects by name. Stores without subject rows fall back to
    /// the distinct subject tags of the stored tests.
    pub async fn list_subjects(&self) -> Vec<Subject> {
        let mut subjects = match self.primary.list_subjects().await {
            Ok(subjects) => subjects,
            Err(e) => {
                warn!("Failed to load subjects: {:#}", e);
                Vec::new()
            }
        };
        if subjects.is_empty() {
            subjects = self.subjects_from_tests().await;
        }
        subjects.retain(|s| s.is_active);
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        subjects
    }

    async fn subjects_from_tests(&self) -> Vec<Subject> {
        let tests = match self.primary.list_tests().await {
            Ok(tests) => tests,
            Err(e) => {
                warn!("Failed to list tests for subjects: {:#}", e);
                return Vec::new();
            }
        };
        let names: BTreeSet<&str> = tests
            .iter()
            .map(|t| t.subject.trim())
            .filter(|s| !s.is_empty())
            .collect();
        names
            .into_iter()
            .map(|name| Subject {
                id: name.to_lowercase().replace(char::is_whitespace, "-"),
                name: name.to_string(),
                is_active: true,
            })
            .collect()
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Reconcile the mirror with the primary.
    ///
    /// Provisional records are replayed first (including deletes). Then every
    /// primary record is compared with its mirror copy: missing copies are
    /// pushed, differing copies are reported as conflicts and overwritten.
    pub async fn sync(&self) -> Result<SyncReport, PlatformError> {
        let Some(mirror) = self.mirror.clone() else {
            return Ok(SyncReport::default());
        };
        let mirror = mirror.as_ref();

        let mut report = SyncReport {
            mirror: Some(mirror.name().to_string()),
            ..Default::default()
        };

        let pending = self.pending_sync();
        for record in pending {
            match self.replay(mirror, &record).await {
                Ok(()) => {
                    self.provisional_set().remove(&record);
                    report.retried += 1;
                }
                Err(e) => report.failed.push(SyncFailure {
                    record,
                    error: format!("{:#}", e),
                }),
            }
        }

        let tests = self.primary.list_tests().await?;
        for test in &tests {
            let primary = self.primary.list_questions(&test.id).await?;
            let mirrored = mirror.list_questions(&test.id).await?;
            reconcile(mirror, &primary, mirrored, |r| Change::Question(r), &mut report).await;

            let primary = self.primary.list_results(&test.id).await?;
            let mirrored = mirror.list_results(&test.id).await?;
            reconcile(mirror, &primary, mirrored, |r| Change::Result(r), &mut report).await;
        }
        let mirrored = mirror.list_tests().await?;
        reconcile(mirror, &tests, mirrored, |r| Change::Test(r), &mut report).await;

        let primary = self.primary.list_access_keys().await?;
        let mirrored = mirror.list_access_keys().await?;
        reconcile(mirror, &primary, mirrored, |r| Change::AccessKey(r), &mut report).await;

        let primary = self.primary.list_notifications().await?;
        let mirrored = mirror.list_notifications().await?;
        reconcile(mirror, &primary, mirrored, |r| Change::Notification(r), &mut report).await;

        let primary = self.primary.list_current_affairs().await?;
        let mirrored = mirror.list_current_affairs().await?;
        reconcile(mirror, &primary, mirrored, |r| Change::CurrentAffairs(r), &mut report).await;

        let primary = self.primary.list_subjects().await?;
        let mirrored = mirror.list_subjects().await?;
        reconcile(mirror, &primary, mirrored, |r| Change::Subject(r), &mut report).await;

        info!(
            "Sync to {}: {} retried, {} pushed, {} unchanged, {} conflicts, {} failed",
            mirror.name(),
            report.retried,
            report.pushed,
            report.unchanged,
            report.conflicts.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Bring the mirror's copy of one record in line with the primary:
    /// write it when the primary has it, delete it otherwise.
    async fn replay(&self, mirror: &dyn RecordStore, record: &RecordRef) -> Result<()> {
        let primary = self.primary.as_ref();
        match record {
            RecordRef::Test { id } => match primary.get_test(id).await? {
                Some(test) => mirror.put_test(&test).await,
                None => apply(mirror, &Change::Delete(record.clone())).await,
            },
            RecordRef::Question { test_id, id } => {
                let found = primary
                    .list_questions(test_id)
                    .await?
                    .into_iter()
                    .find(|q| &q.id == id);
                match found {
                    Some(q) => mirror.put_question(&q).await,
                    None => mirror.delete_question(test_id, id).await,
                }
            }
            RecordRef::AccessKey { id } => {
                let found = primary.list_access_keys().await?.into_iter().find(|k| &k.id == id);
                match found {
                    Some(k) => mirror.put_access_key(&k).await,
                    None => mirror.delete_access_key(id).await,
                }
            }
            RecordRef::Result { test_id, id } => {
                let found = primary.list_results(test_id).await?.into_iter().find(|r| &r.id == id);
                match found {
                    Some(r) => mirror.put_result(&r).await,
                    None => Ok(()),
                }
            }
            RecordRef::Notification { id } => {
                let found = primary
                    .list_notifications()
                    .await?
                    .into_iter()
                    .find(|n| &n.id == id);
                match found {
                    Some(n) => mirror.put_notification(&n).await,
                    None => mirror.delete_notification(id).await,
                }
            }
            RecordRef::CurrentAffairs { date } => match primary.get_current_affairs(date).await? {
                Some(d) => mirror.put_current_affairs(&d).await,
                None => Ok(()),
            },
            RecordRef::Subject { id } => {
                let found = primary.list_subjects().await?.into_iter().find(|s| &s.id == id);
                match found {
                    Some(s) => mirror.put_subject(&s).await,
                    None => Ok(()),
                }
            }
        }
    }
}

/// Compare one collection between primary and mirror, pushing what differs.
async fn reconcile<T>(
    mirror: &dyn RecordStore,
    primary: &[T],
    mirrored: Vec<T>,
    to_change: fn(&T) -> Change<'_>,
    report: &mut SyncReport,
) where
    T: PartialEq + Send + Sync,
{
    let mut mirrored: HashMap<RecordRef, T> = mirrored
        .into_iter()
        .map(|record| {
            let key = to_change(&record).record();
            (key, record)
        })
        .collect();

    for record in primary {
        let change = to_change(record);
        let key = change.record();

        match mirrored.remove(&key) {
            Some(copy) if copy == *record => {
                report.unchanged += 1;
                continue;
            }
            Some(_) => {
                debug!("Conflict on {}: mirror copy differs", key);
                report.conflicts.push(key.clone());
            }
            None => {}
        }

        match apply(mirror, &change).await {
            Ok(()) => report.pushed += 1,
            Err(e) => report.failed.push(SyncFailure {
                record: key,
                error: format!("{:#}", e),
            }),
        }
    }

    report.mirror_only.extend(mirrored.into_keys());
}

fn validate_question(input: &QuestionInput) -> Result<(), PlatformError> {
    if input.question_text_en.trim().is_empty() {
        return Err(PlatformError::Invalid(
            "question_text_en is required".to_string(),
        ));
    }
    let options = [
        &input.option_a_en,
        &input.option_b_en,
        &input.option_c_en,
        &input.option_d_en,
    ];
    if options.iter().all(|o| o.trim().is_empty()) {
        return Err(PlatformError::Invalid(
            "at least one option is required".to_string(),
        ));
    }
    Ok(())
}

/// Score an answer sheet with the test's marking scheme.
pub fn grade(
    test: &MockTest,
    questions: &[Question],
    answers: &HashMap<String, OptionLetter>,
    user_name: String,
    time_taken_secs: u64,
) -> TestResult {
    let (mut correct, mut wrong, mut unattempted) = (0u32, 0u32, 0u32);

    for question in questions {
        match (answers.get(&question.id), question.correct_option) {
            (Some(given), Some(expected)) if *given == expected => correct += 1,
            (Some(_), Some(_)) => wrong += 1,
            _ => unattempted += 1,
        }
    }

    TestResult {
        id: new_id(),
        test_id: test.id.clone(),
        user_name,
        correct,
        wrong,
        unattempted,
        score: round2(f64::from(correct) * test.mark_correct + f64::from(wrong) * test.mark_wrong),
        time_taken_secs,
        submitted_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Article, BankQuestion};
    use crate::store::LocalStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Local store whose writes can be switched to fail, or whose question
    /// writes start failing after a fixed number.
    struct FlakyStore {
        inner: LocalStore,
        fail_writes: AtomicBool,
        questions_left: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: LocalStore::new(),
                fail_writes: AtomicBool::new(false),
                questions_left: AtomicUsize::new(usize::MAX),
            }
        }

        fn fail_questions_after(&self, n: usize) {
            self.questions_left.store(n, Ordering::SeqCst);
        }

        fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("mirror unavailable");
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RecordStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn list_tests(&self) -> Result<Vec<MockTest>> {
            self.inner.list_tests().await
        }
        async fn get_test(&self, id: &str) -> Result<Option<MockTest>> {
            self.inner.get_test(id).await
        }
        async fn put_test(&self, test: &MockTest) -> Result<()> {
            self.check()?;
            self.inner.put_test(test).await
        }
        async fn delete_test(&self, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete_test(id).await
        }
        async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>> {
            self.inner.list_questions(test_id).await
        }
        async fn put_question(&self, question: &Question) -> Result<()> {
            self.check()?;
            self.questions_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map_err(|_| anyhow::anyhow!("question write rejected"))?;
            self.inner.put_question(question).await
        }
        async fn delete_question(&self, test_id: &str, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete_question(test_id, id).await
        }
        async fn delete_questions(&self, test_id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete_questions(test_id).await
        }
        async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
            self.inner.list_access_keys().await
        }
        async fn put_access_key(&self, key: &AccessKey) -> Result<()> {
            self.check()?;
            self.inner.put_access_key(key).await
        }
        async fn delete_access_key(&self, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete_access_key(id).await
        }
        async fn list_results(&self, test_id: &str) -> Result<Vec<TestResult>> {
            self.inner.list_results(test_id).await
        }
        async fn put_result(&self, result: &TestResult) -> Result<()> {
            self.check()?;
            self.inner.put_result(result).await
        }
        async fn list_notifications(&self) -> Result<Vec<Notification>> {
            self.inner.list_notifications().await
        }
        async fn put_notification(&self, notification: &Notification) -> Result<()> {
            self.check()?;
            self.inner.put_notification(notification).await
        }
        async fn delete_notification(&self, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete_notification(id).await
        }
        async fn get_current_affairs(&self, date: &str) -> Result<Option<CurrentAffairsDigest>> {
            self.inner.get_current_affairs(date).await
        }
        async fn list_current_affairs(&self) -> Result<Vec<CurrentAffairsDigest>> {
            self.inner.list_current_affairs().await
        }
        async fn put_current_affairs(&self, digest: &CurrentAffairsDigest) -> Result<()> {
            self.check()?;
            self.inner.put_current_affairs(digest).await
        }
        async fn list_subjects(&self) -> Result<Vec<Subject>> {
            self.inner.list_subjects().await
        }
        async fn put_subject(&self, subject: &Subject) -> Result<()> {
            self.check()?;
            self.inner.put_subject(subject).await
        }
    }

    fn platform() -> Platform {
        Platform::new(Arc::new(LocalStore::new()), None, ParserConfig::default())
    }

    fn mirrored() -> (Platform, Arc<LocalStore>, Arc<FlakyStore>) {
        let primary = Arc::new(LocalStore::new());
        let mirror = Arc::new(FlakyStore::new());
        let platform = Platform::new(
            primary.clone(),
            Some(mirror.clone() as Arc<dyn RecordStore>),
            ParserConfig::default(),
        );
        (platform, primary, mirror)
    }

    fn test_input(title: &str) -> TestInput {
        TestInput {
            title_en: title.to_string(),
            title_hi: None,
            subject: "Polity".to_string(),
            time_limit_minutes: None,
            mark_correct: None,
            mark_wrong: None,
            status: None,
            difficulty: None,
        }
    }

    fn question_input(text: &str, answer: Option<OptionLetter>) -> QuestionInput {
        QuestionInput {
            question_text_en: text.to_string(),
            option_a_en: "one".to_string(),
            option_b_en: "two".to_string(),
            option_c_en: "three".to_string(),
            option_d_en: "four".to_string(),
            correct_option: answer,
            ..Default::default()
        }
    }

    fn result(correct: u32, time_taken_secs: u64) -> TestResult {
        TestResult {
            id: new_id(),
            test_id: "t1".to_string(),
            user_name: format!("user-{}-{}", correct, time_taken_secs),
            correct,
            wrong: 0,
            unattempted: 0,
            score: f64::from(correct) * 2.0,
            time_taken_secs,
            submitted_at: Utc::now(),
        }
    }

    fn bank_question(n: u32, text: &str, answer: Option<OptionLetter>) -> BankQuestion {
        BankQuestion {
            id: None,
            question_number: n,
            question_text_en: text.to_string(),
            question_text_hi: Some(format!("{} (हिंदी)", text)),
            option_a_en: "A".to_string(),
            option_b_en: "B".to_string(),
            option_c_en: "C".to_string(),
            option_d_en: String::new(),
            option_a_hi: Some("क".to_string()),
            option_b_hi: None,
            option_c_hi: None,
            option_d_hi: None,
            correct_option: answer.unwrap_or(OptionLetter::A),
            answer_detected: answer.is_some(),
            explanation_en: format!("Because of {}", n),
            explanation_hi: None,
            source: None,
            difficulty: "hard".to_string(),
        }
    }

    #[test]
    fn test_leaderboard_ordering() {
        let ranked = rank_results(vec![result(8, 120), result(9, 200), result(9, 150)]);
        let order: Vec<(u32, u32, u64)> = ranked
            .iter()
            .map(|e| (e.rank, e.result.correct, e.result.time_taken_secs))
            .collect();
        assert_eq!(order, vec![(1, 9, 150), (2, 9, 200), (3, 8, 120)]);
    }

    #[test]
    fn test_grade_uses_marking_scheme() {
        let test = MockTest {
            id: "t1".to_string(),
            title_en: "Mock".to_string(),
            title_hi: None,
            subject: String::new(),
            time_limit_minutes: 10,
            mark_correct: 2.0,
            mark_wrong: -0.66,
            status: TestStatus::Active,
            total_questions: 4,
            difficulty: DEFAULT_DIFFICULTY.to_string(),
            source: None,
            created_at: Utc::now(),
        };
        let questions: Vec<Question> = [Some(OptionLetter::A), Some(OptionLetter::B), Some(OptionLetter::C), None]
            .into_iter()
            .enumerate()
            .map(|(i, answer)| {
                question_input("q", answer).into_question(format!("q{}", i), "t1".into(), i as u32 + 1)
            })
            .collect();
        let answers = HashMap::from([
            ("q0".to_string(), OptionLetter::A),
            ("q1".to_string(), OptionLetter::D),
            ("q3".to_string(), OptionLetter::A),
        ]);

        let graded = grade(&test, &questions, &answers, "asha".into(), 300);
        assert_eq!((graded.correct, graded.wrong, graded.unattempted), (1, 1, 2));
        assert_eq!(graded.score, 1.34);
    }

    #[tokio::test]
    async fn test_delete_question_renumbers_and_updates_total() {
        let platform = platform();
        let test = platform.create_test(test_input("Renumber")).await.unwrap();
        let mut ids = Vec::new();
        for text in ["first", "second", "third", "fourth"] {
            ids.push(platform.add_question(&test.id, question_input(text, None)).await.unwrap().id);
        }

        platform.delete_question(&test.id, &ids[1]).await.unwrap();

        let questions = platform.list_questions(&test.id).await.unwrap();
        let numbered: Vec<(u32, &str)> = questions
            .iter()
            .map(|q| (q.question_number, q.question_text_en.as_str()))
            .collect();
        assert_eq!(numbered, vec![(1, "first"), (2, "third"), (3, "fourth")]);
        assert_eq!(platform.get_test(&test.id).await.unwrap().total_questions, 3);
    }

    #[tokio::test]
    async fn test_delete_test_cascades_only_its_questions() {
        let platform = platform();
        let doomed = platform.create_test(test_input("Doomed")).await.unwrap();
        let kept = platform.create_test(test_input("Kept")).await.unwrap();
        platform.add_question(&doomed.id, question_input("gone", None)).await.unwrap();
        platform.add_question(&kept.id, question_input("stays", None)).await.unwrap();

        platform.delete_test(&doomed.id).await.unwrap();

        assert!(matches!(
            platform.get_test(&doomed.id).await,
            Err(PlatformError::NotFound(_))
        ));
        assert!(platform.list_questions(&doomed.id).await.unwrap().is_empty());
        assert_eq!(platform.list_questions(&kept.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bank_export_import_round_trip() {
        let platform = platform();
        let bank = QuestionBank {
            id: None,
            title_en: "Modern History".to_string(),
            title_hi: Some("आधुनिक इतिहास".to_string()),
            subject: "History".to_string(),
            total_questions: 3,
            time_limit_minutes: 15,
            difficulty: "hard".to_string(),
            source: Some("PYQ".to_string()),
            created_at: "2024-03-01T10:15:30.123456".to_string(),
            questions: vec![
                bank_question(1, "Who founded the INC?", Some(OptionLetter::B)),
                bank_question(2, "Year of Dandi March?", None),
                bank_question(3, "Who wrote Gita Rahasya?", Some(OptionLetter::C)),
            ],
        };

        let test = platform.import_bank(bank.clone()).await.unwrap();
        assert_eq!(test.total_questions, 3);
        let exported = platform.export_bank(&test.id).await.unwrap();
        let reimported = platform.import_bank(exported.clone()).await.unwrap();
        let again = platform.export_bank(&reimported.id).await.unwrap();

        assert_eq!(again.questions.len(), bank.questions.len());
        for (original, round_tripped) in bank.questions.iter().zip(&again.questions) {
            let mut round_tripped = round_tripped.clone();
            round_tripped.id = None;
            assert_eq!(&round_tripped, original);
        }
        assert_eq!(again.title_hi, bank.title_hi);
        assert_eq!(again.time_limit_minutes, 15);
        assert_eq!(again.created_at, exported.created_at);
    }

    #[tokio::test]
    async fn test_failed_import_leaves_no_partial_test() {
        let primary = Arc::new(FlakyStore::new());
        let platform = Platform::new(primary.clone(), None, ParserConfig::default());
        primary.fail_questions_after(1);

        let bank = QuestionBank {
            id: None,
            title_en: "Half written".to_string(),
            title_hi: None,
            subject: "Polity".to_string(),
            total_questions: 3,
            time_limit_minutes: 10,
            difficulty: DEFAULT_DIFFICULTY.to_string(),
            source: None,
            created_at: Utc::now().to_rfc3339(),
            questions: vec![
                bank_question(1, "First?", Some(OptionLetter::A)),
                bank_question(2, "Second?", None),
                bank_question(3, "Third?", Some(OptionLetter::D)),
            ],
        };

        assert!(matches!(
            platform.import_bank(bank).await,
            Err(PlatformError::Store(_))
        ));
        for test in primary.list_tests().await.unwrap() {
            let stored = primary.list_questions(&test.id).await.unwrap().len();
            assert_eq!(test.total_questions as usize, stored);
        }
        assert!(platform.list_tests(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_empty_bank() {
        let platform = platform();
        let bank = QuestionBank {
            id: None,
            title_en: "Empty".to_string(),
            title_hi: None,
            subject: String::new(),
            total_questions: 0,
            time_limit_minutes: 10,
            difficulty: DEFAULT_DIFFICULTY.to_string(),
            source: None,
            created_at: Utc::now().to_rfc3339(),
            questions: Vec::new(),
        };
        assert!(matches!(
            platform.import_bank(bank).await,
            Err(PlatformError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_access_key_validation_and_usage() {
        let platform = platform();
        let key = platform
            .create_access_key(AccessKeyInput {
                code: Some("GenZ1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(platform.validate_access_key("GenZ1").await);
        assert!(!platform.validate_access_key("genz1").await);

        let keys = platform.list_access_keys().await.unwrap();
        assert_eq!(keys[0].usage_count, 1);
        assert!(keys[0].last_used_at.is_some());

        platform.set_access_key_active(&key.id, false).await.unwrap();
        assert!(!platform.validate_access_key("GenZ1").await);
    }

    #[tokio::test]
    async fn test_duplicate_access_key_conflicts() {
        let platform = platform();
        let input = AccessKeyInput {
            code: Some("BATCH-24".to_string()),
            ..Default::default()
        };
        platform.create_access_key(input.clone()).await.unwrap();
        assert!(matches!(
            platform.create_access_key(input).await,
            Err(PlatformError::Conflict(_))
        ));

        let generated = platform.create_access_key(AccessKeyInput::default()).await.unwrap();
        assert_eq!(generated.code.len(), 8);
    }

    #[tokio::test]
    async fn test_drafts_hidden_from_students() {
        let platform = platform();
        let mut draft = test_input("Work in progress");
        draft.status = Some(TestStatus::Draft);
        platform.create_test(draft).await.unwrap();
        platform.create_test(test_input("Live")).await.unwrap();

        let public = platform.list_tests(false).await;
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].title_en, "Live");
        assert_eq!(platform.list_tests(true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_attempt_feeds_leaderboard() {
        let platform = platform();
        let test = platform.create_test(test_input("Quiz")).await.unwrap();
        let q = platform
            .add_question(&test.id, question_input("2 + 2?", Some(OptionLetter::B)))
            .await
            .unwrap();

        for (name, answer, secs) in [("ravi", OptionLetter::A, 50), ("meera", OptionLetter::B, 90)] {
            let attempt = AttemptInput {
                user_name: name.to_string(),
                answers: HashMap::from([(q.id.clone(), answer)]),
                time_taken_secs: secs,
            };
            platform.submit_attempt(&test.id, attempt).await.unwrap();
        }

        let board = platform.leaderboard(&test.id).await;
        assert_eq!(board[0].result.user_name, "meera");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].result.score, -0.66);
    }

    #[tokio::test]
    async fn test_weekly_summary_looks_up_each_day() {
        let platform = platform();
        let end = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        for day in [4, 7, 10, 11] {
            let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            let digest = CurrentAffairsDigest {
                date: String::new(),
                articles: vec![Article {
                    title: format!("News {}", day),
                    summary: String::new(),
                    category: "Economy".to_string(),
                    source: "PIB".to_string(),
                    url: None,
                    highlights: Vec::new(),
                }],
            };
            platform.put_current_affairs(date, digest).await.unwrap();
        }

        let summary = platform.weekly_summary(end).await;
        assert_eq!(summary.start, "20240304");
        let dates: Vec<&str> = summary.days.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["20240304", "20240307", "20240310"]);
        assert_eq!(summary.total_articles, 3);
    }

    #[tokio::test]
    async fn test_mirror_failure_marks_provisional_then_sync_repairs() {
        let (platform, _primary, mirror) = mirrored();

        mirror.set_failing(true);
        let test = platform.create_test(test_input("Offline mirror")).await.unwrap();
        assert_eq!(
            platform.pending_sync(),
            vec![RecordRef::Test { id: test.id.clone() }]
        );
        assert!(mirror.get_test(&test.id).await.unwrap().is_none());

        mirror.set_failing(false);
        let report = platform.sync().await.unwrap();
        assert_eq!(report.retried, 1);
        assert!(report.failed.is_empty());
        assert!(platform.pending_sync().is_empty());
        assert_eq!(mirror.get_test(&test.id).await.unwrap(), Some(test));
    }

    #[tokio::test]
    async fn test_poisoned_provisional_lock_still_tracks() {
        let (platform, _primary, mirror) = mirrored();
        let lock = platform.provisional.clone();
        let _ = std::thread::spawn(move || {
            let _guard = lock.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(platform.provisional.is_poisoned());

        mirror.set_failing(true);
        let test = platform.create_test(test_input("After poison")).await.unwrap();
        assert_eq!(platform.pending_sync(), vec![RecordRef::Test { id: test.id }]);
    }

    #[tokio::test]
    async fn test_subjects_derived_from_test_tags() {
        let platform = platform();
        let mut input = test_input("Constitution basics");
        input.subject = "Polity".to_string();
        platform.create_test(input).await.unwrap();
        let mut input = test_input("Mughal era");
        input.subject = "History".to_string();
        platform.create_test(input.clone()).await.unwrap();
        platform.create_test(input).await.unwrap();

        let names: Vec<String> = platform
            .list_subjects()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["History", "Polity"]);
    }

    #[tokio::test]
    async fn test_subject_rows_take_precedence() {
        let primary = Arc::new(LocalStore::new());
        let platform = Platform::new(primary.clone(), None, ParserConfig::default());
        platform.create_test(test_input("Tagged")).await.unwrap();
        primary
            .put_subject(&Subject {
                id: "geo".to_string(),
                name: "Geography".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        let names: Vec<String> = platform
            .list_subjects()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Geography"]);
    }

    #[tokio::test]
    async fn test_path_like_ids_rejected() {
        let platform = platform();
        platform
            .create_access_key(AccessKeyInput {
                code: Some("KEEP1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(
            platform.delete_notification("../access_keys").await,
            Err(PlatformError::Invalid(_))
        ));
        assert!(matches!(
            platform.get_test("t1/questions").await,
            Err(PlatformError::Invalid(_))
        ));
        assert!(matches!(
            platform.delete_notification("missing").await,
            Err(PlatformError::NotFound(_))
        ));
        assert_eq!(platform.list_access_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mirror_delete_is_replayed() {
        let (platform, _primary, mirror) = mirrored();
        let test = platform.create_test(test_input("Short lived")).await.unwrap();
        platform.add_question(&test.id, question_input("q", None)).await.unwrap();

        mirror.set_failing(true);
        platform.delete_test(&test.id).await.unwrap();
        assert!(mirror.get_test(&test.id).await.unwrap().is_some());

        mirror.set_failing(false);
        platform.sync().await.unwrap();
        assert!(mirror.get_test(&test.id).await.unwrap().is_none());
        assert!(mirror.list_questions(&test.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_reports_conflicts() {
        let (platform, _primary, mirror) = mirrored();
        let test = platform.create_test(test_input("Original title")).await.unwrap();

        let mut diverged = test.clone();
        diverged.title_en = "Edited in the other console".to_string();
        mirror.put_test(&diverged).await.unwrap();
        let stray = AccessKey {
            id: "stray".to_string(),
            code: "OLD".to_string(),
            is_active: None,
            created_at: Utc::now(),
            expires_at: None,
            usage_count: 0,
            last_used_at: None,
            note: None,
        };
        mirror.put_access_key(&stray).await.unwrap();

        let report = platform.sync().await.unwrap();
        assert_eq!(report.conflicts, vec![RecordRef::Test { id: test.id.clone() }]);
        assert_eq!(report.mirror_only, vec![RecordRef::AccessKey { id: "stray".into() }]);
        assert_eq!(report.pushed, 1);
        assert_eq!(mirror.get_test(&test.id).await.unwrap(), Some(test));
    }

    #[tokio::test]
    async fn test_sync_without_mirror_is_noop() {
        let report = platform().sync().await.unwrap();
        assert!(report.mirror.is_none());
        assert_eq!(report.pushed, 0);
    }

    #[test]
    fn test_date_key_formats() {
        let date = parse_date_key("2024-03-01").unwrap();
        assert_eq!(date_key(date), "20240301");
        assert_eq!(parse_date_key("20240301"), Some(date));
        assert!(parse_date_key("March 1").is_none());
    }
}
