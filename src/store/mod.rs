//! Record storage backends.
//!
//! Every backend stores the same canonical records. The platform treats one
//! store as the source of truth and an optional second one as a mirror.

pub mod firebase;
pub mod local;
pub mod supabase;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::{Settings, StoreKind};
use crate::schema::{
    AccessKey, CurrentAffairsDigest, MockTest, Notification, Question, Subject, TestResult,
};

pub use firebase::FirebaseStore;
pub use local::LocalStore;
pub use supabase::SupabaseStore;

/// Async CRUD over the platform's record collections.
///
/// Writes are full-record replacements keyed by id. Deletes of a missing
/// record succeed.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tests(&self) -> Result<Vec<MockTest>>;
    async fn get_test(&self, id: &str) -> Result<Option<MockTest>>;
    async fn put_test(&self, test: &MockTest) -> Result<()>;
    async fn delete_test(&self, id: &str) -> Result<()>;

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>>;
    async fn put_question(&self, question: &Question) -> Result<()>;
    async fn delete_question(&self, test_id: &str, id: &str) -> Result<()>;
    /// Remove every question owned by `test_id`.
    async fn delete_questions(&self, test_id: &str) -> Result<()>;

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>>;
    async fn put_access_key(&self, key: &AccessKey) -> Result<()>;
    async fn delete_access_key(&self, id: &str) -> Result<()>;

    async fn list_results(&self, test_id: &str) -> Result<Vec<TestResult>>;
    async fn put_result(&self, result: &TestResult) -> Result<()>;

    async fn list_notifications(&self) -> Result<Vec<Notification>>;
    async fn put_notification(&self, notification: &Notification) -> Result<()>;
    async fn delete_notification(&self, id: &str) -> Result<()>;

    /// Digest for one `YYYYMMDD` date.
    async fn get_current_affairs(&self, date: &str) -> Result<Option<CurrentAffairsDigest>>;
    async fn list_current_affairs(&self) -> Result<Vec<CurrentAffairsDigest>>;
    async fn put_current_affairs(&self, digest: &CurrentAffairsDigest) -> Result<()>;

    async fn list_subjects(&self) -> Result<Vec<Subject>>;
    async fn put_subject(&self, subject: &Subject) -> Result<()>;
}

/// Address of one record, used to track mirror writes that still need to
/// be replayed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordRef {
    Test { id: String },
    Question { test_id: String, id: String },
    AccessKey { id: String },
    Result { test_id: String, id: String },
    Notification { id: String },
    CurrentAffairs { date: String },
    Subject { id: String },
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test { id } => write!(f, "mock_tests/{}", id),
            Self::Question { test_id, id } => write!(f, "questions/{}/{}", test_id, id),
            Self::AccessKey { id } => write!(f, "access_keys/{}", id),
            Self::Result { test_id, id } => write!(f, "results/{}/{}", test_id, id),
            Self::Notification { id } => write!(f, "notifications/{}", id),
            Self::CurrentAffairs { date } => write!(f, "current_affairs/{}", date),
            Self::Subject { id } => write!(f, "subjects/{}", id),
        }
    }
}

/// Build the store for a backend slot.
pub fn open_store(kind: StoreKind, settings: &Settings) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match kind {
        StoreKind::Local => Arc::new(LocalStore::open(&settings.local_store_path)?),
        StoreKind::Firebase => Arc::new(FirebaseStore::from_env()?),
        StoreKind::Supabase => Arc::new(SupabaseStore::from_env()?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ref_paths() {
        let q = RecordRef::Question {
            test_id: "t1".into(),
            id: "q1".into(),
        };
        assert_eq!(q.to_string(), "questions/t1/q1");
        assert_eq!(
            RecordRef::CurrentAffairs {
                date: "20240301".into()
            }
            .to_string(),
            "current_affairs/20240301"
        );
    }
}
