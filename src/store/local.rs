//! In-process record store, optionally persisted to a JSON file.
//!
//! Every mutation is written through to disk immediately. Without a path the
//! store is memory-only, which is what tests use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::RecordStore;
use crate::schema::{
    AccessKey, CurrentAffairsDigest, MockTest, Notification, Question, Subject, TestResult,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LocalData {
    mock_tests: BTreeMap<String, MockTest>,
    /// test id → question id → question
    questions: BTreeMap<String, BTreeMap<String, Question>>,
    access_keys: BTreeMap<String, AccessKey>,
    /// test id → result id → result
    results: BTreeMap<String, BTreeMap<String, TestResult>>,
    notifications: BTreeMap<String, Notification>,
    current_affairs: BTreeMap<String, CurrentAffairsDigest>,
    subjects: BTreeMap<String, Subject>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    inner: Arc<RwLock<LocalData>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by `path`, loading existing data when the file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read local store: {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse local store: {:?}", path))?
        } else {
            LocalData::default()
        };

        info!(
            "Local store at {:?}: {} tests, {} access keys",
            path,
            data.mock_tests.len(),
            data.access_keys.len()
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path.to_path_buf()),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&LocalData) -> T) -> T {
        let data = self.inner.read().unwrap();
        f(&data)
    }

    /// Apply a mutation and write the result through to disk. The change
    /// becomes visible only once the write succeeds.
    fn mutate(&self, f: impl FnOnce(&mut LocalData)) -> Result<()> {
        let mut data = self.inner.write().unwrap();
        let mut next = data.clone();
        f(&mut next);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            let json = serde_json::to_string_pretty(&next)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write local store: {:?}", path))?;
            debug!("LocalStore: persisted to {:?}", path);
        }

        *data = next;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_tests(&self) -> Result<Vec<MockTest>> {
        Ok(self.read(|d| d.mock_tests.values().cloned().collect()))
    }

    async fn get_test(&self, id: &str) -> Result<Option<MockTest>> {
        Ok(self.read(|d| d.mock_tests.get(id).cloned()))
    }

    async fn put_test(&self, test: &MockTest) -> Result<()> {
        self.mutate(|d| {
            d.mock_tests.insert(test.id.clone(), test.clone());
        })
    }

    async fn delete_test(&self, id: &str) -> Result<()> {
        self.mutate(|d| {
            d.mock_tests.remove(id);
        })
    }

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>> {
        Ok(self.read(|d| {
            d.questions
                .get(test_id)
                .map(|qs| qs.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn put_question(&self, question: &Question) -> Result<()> {
        self.mutate(|d| {
            d.questions
                .entry(question.test_id.clone())
                .or_default()
                .insert(question.id.clone(), question.clone());
        })
    }

    async fn delete_question(&self, test_id: &str, id: &str) -> Result<()> {
        self.mutate(|d| {
            if let Some(qs) = d.questions.get_mut(test_id) {
                qs.remove(id);
            }
        })
    }

    async fn delete_questions(&self, test_id: &str) -> Result<()> {
        self.mutate(|d| {
            d.questions.remove(test_id);
        })
    }

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        Ok(self.read(|d| d.access_keys.values().cloned().collect()))
    }

    async fn put_access_key(&self, key: &AccessKey) -> Result<()> {
        self.mutate(|d| {
            d.access_keys.insert(key.id.clone(), key.clone());
        })
    }

    async fn delete_access_key(&self, id: &str) -> Result<()> {
        self.mutate(|d| {
            d.access_keys.remove(id);
        })
    }

    async fn list_results(&self, test_id: &str) -> Result<Vec<TestResult>> {
        Ok(self.read(|d| {
            d.results
                .get(test_id)
                .map(|rs| rs.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn put_result(&self, result: &TestResult) -> Result<()> {
        self.mutate(|d| {
            d.results
                .entry(result.test_id.clone())
                .or_default()
                .insert(result.id.clone(), result.clone());
        })
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.read(|d| d.notifications.values().cloned().collect()))
    }

    async fn put_notification(&self, notification: &Notification) -> Result<()> {
        self.mutate(|d| {
            d.notifications
                .insert(notification.id.clone(), notification.clone());
        })
    }

    async fn delete_notification(&self, id: &str) -> Result<()> {
        self.mutate(|d| {
            d.notifications.remove(id);
        })
    }

    async fn get_current_affairs(&self, date: &str) -> Result<Option<CurrentAffairsDigest>> {
        Ok(self.read(|d| d.current_affairs.get(date).cloned()))
    }

    async fn list_current_affairs(&self) -> Result<Vec<CurrentAffairsDigest>> {
        Ok(self.read(|d| d.current_affairs.values().cloned().collect()))
    }

    async fn put_current_affairs(&self, digest: &CurrentAffairsDigest) -> Result<()> {
        self.mutate(|d| {
            d.current_affairs.insert(digest.date.clone(), digest.clone());
        })
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        Ok(self.read(|d| d.subjects.values().cloned().collect()))
    }

    async fn put_subject(&self, subject: &Subject) -> Result<()> {
        self.mutate(|d| {
            d.subjects.insert(subject.id.clone(), subject.clone());
        })
    }
}
