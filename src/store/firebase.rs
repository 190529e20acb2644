//! Hierarchical key-value store over the Firebase Realtime Database REST API.
//!
//! Layout:
//! `/access_keys/{id}`, `/mock_tests/{id}`, `/questions/{testId}/{qId}`,
//! `/results/{testId}/{resultId}`, `/notifications/{id}`,
//! `/current_affairs/{YYYYMMDD}`, `/subjects/{id}`.
//! `PUT` replaces the object at a path, `DELETE` removes the subtree.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::RecordStore;
use crate::schema::{
    AccessKey, CurrentAffairsDigest, MockTest, Notification, Question, Subject, TestResult,
};

#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

impl FirebaseStore {
    pub fn new(base_url: impl Into<String>, auth: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Create a store from `FIREBASE_URL` and optional `FIREBASE_AUTH`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("FIREBASE_URL").map_err(|_| anyhow!("FIREBASE_URL not set"))?;
        let auth = std::env::var("FIREBASE_AUTH").ok().filter(|s| !s.is_empty());
        Ok(Self::new(base_url, auth))
    }

    /// REST URL for `path`. Segments that Firebase forbids in keys, or that
    /// would escape the collection once resolved, are rejected.
    fn url(&self, path: &str) -> Result<String> {
        let bad_segment = path.split('/').any(|segment| {
            segment.is_empty()
                || segment
                    .chars()
                    .any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '?' | '&' | '%'))
        });
        if bad_segment {
            return Err(anyhow!("Invalid Firebase path: {:?}", path));
        }

        Ok(match &self.auth {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        })
    }

    /// GET a path. Firebase answers `null` for a missing path.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .with_context(|| format!("Firebase GET {} failed", path))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Firebase GET {} failed: {} - {}", path, status, text));
        }

        Ok(resp.json().await?)
    }

    /// Children of a collection path. Entries that do not decode are skipped.
    async fn get_children<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let map: Option<BTreeMap<String, serde_json::Value>> = self.get_json(path).await?;
        Ok(map
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed record {}/{}: {}", path, key, e);
                    None
                }
            })
            .collect())
    }

    async fn put_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let resp = self
            .client
            .put(self.url(path)?)
            .json(value)
            .send()
            .await
            .with_context(|| format!("Firebase PUT {} failed", path))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Firebase PUT {} failed: {} - {}", path, status, text));
        }

        debug!("Firebase PUT {}", path);
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(path)?)
            .send()
            .await
            .with_context(|| format!("Firebase DELETE {} failed", path))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Firebase DELETE {} failed: {} - {}", path, status, text));
        }

        debug!("Firebase DELETE {}", path);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for FirebaseStore {
    fn name(&self) -> &str {
        "firebase"
    }

    async fn list_tests(&self) -> Result<Vec<MockTest>> {
        self.get_children("mock_tests").await
    }

    async fn get_test(&self, id: &str) -> Result<Option<MockTest>> {
        self.get_json(&format!("mock_tests/{}", id)).await
    }

    async fn put_test(&self, test: &MockTest) -> Result<()> {
        self.put_json(&format!("mock_tests/{}", test.id), test).await
    }

    async fn delete_test(&self, id: &str) -> Result<()> {
        self.delete_path(&format!("mock_tests/{}", id)).await
    }

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>> {
        self.get_children(&format!("questions/{}", test_id)).await
    }

    async fn put_question(&self, question: &Question) -> Result<()> {
        let path = format!("questions/{}/{}", question.test_id, question.id);
        self.put_json(&path, question).await
    }

    async fn delete_question(&self, test_id: &str, id: &str) -> Result<()> {
        self.delete_path(&format!("questions/{}/{}", test_id, id)).await
    }

    async fn delete_questions(&self, test_id: &str) -> Result<()> {
        self.delete_path(&format!("questions/{}", test_id)).await
    }

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        self.get_children("access_keys").await
    }

    async fn put_access_key(&self, key: &AccessKey) -> Result<()> {
        self.put_json(&format!("access_keys/{}", key.id), key).await
    }

    async fn delete_access_key(&self, id: &str) -> Result<()> {
        self.delete_path(&format!("access_keys/{}", id)).await
    }

    async fn list_results(&self, test_id: &str) -> Result<Vec<TestResult>> {
        self.get_children(&format!("results/{}", test_id)).await
    }

    async fn put_result(&self, result: &TestResult) -> Result<()> {
        let path = format!("results/{}/{}", result.test_id, result.id);
        self.put_json(&path, result).await
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>> {
        self.get_children("notifications").await
    }

    async fn put_notification(&self, notification: &Notification) -> Result<()> {
        let path = format!("notifications/{}", notification.id);
        self.put_json(&path, notification).await
    }

    async fn delete_notification(&self, id: &str) -> Result<()> {
        self.delete_path(&format!("notifications/{}", id)).await
    }

    async fn get_current_affairs(&self, date: &str) -> Result<Option<CurrentAffairsDigest>> {
        self.get_json(&format!("current_affairs/{}", date)).await
    }

    async fn list_current_affairs(&self) -> Result<Vec<CurrentAffairsDigest>> {
        self.get_children("current_affairs").await
    }

    async fn put_current_affairs(&self, digest: &CurrentAffairsDigest) -> Result<()> {
        self.put_json(&format!("current_affairs/{}", digest.date), digest)
            .await
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.get_children("subjects").await
    }

    async fn put_subject(&self, subject: &Subject) -> Result<()> {
        self.put_json(&format!("subjects/{}", subject.id), subject).await
    }
}
