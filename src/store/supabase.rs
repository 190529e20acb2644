//! Relational store over the Supabase PostgREST API.
//!
//! Tables: `mock_tests`, `questions`, `access_keys`, `test_attempts`,
//! `notifications`, `subjects` and `current_affairs`. Row columns match the
//! canonical record field names. Writes are upserts on the primary key.

use anyhow::{anyhow, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::RecordStore;
use crate::schema::{
    AccessKey, CurrentAffairsDigest, MockTest, Notification, Question, Subject, TestResult,
};

#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Create a new Supabase store from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("SUPABASE_URL").map_err(|_| anyhow!("SUPABASE_URL not set"))?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| anyhow!("SUPABASE_SERVICE_ROLE_KEY not set"))?;
        Ok(Self::new(base_url, service_role_key))
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    /// Helper: GET rows from Supabase REST API.
    async fn get_rows<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let resp = self
            .authed(self.client.get(self.rest_url(path)))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase GET {} failed: {} - {}", path, status, text));
        }

        Ok(resp.json().await?)
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let rows: Vec<T> = self.get_rows(path).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert or replace one row, keyed on `conflict_key`.
    async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        conflict_key: &str,
        row: &T,
    ) -> Result<()> {
        let url = self.rest_url(&format!("{}?on_conflict={}", table, conflict_key));
        let resp = self
            .authed(self.client.post(&url))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to upsert into {}: {} - {}",
                table,
                status,
                text
            ));
        }

        debug!("Upserted row into {}", table);
        Ok(())
    }

    async fn delete_where(&self, table: &str, filter: &str) -> Result<()> {
        let url = self.rest_url(&format!("{}?{}", table, filter));
        let resp = self
            .authed(self.client.delete(&url))
            .header("Prefer", "return=minimal")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to delete from {} ({}): {} - {}",
                table,
                filter,
                status,
                text
            ));
        }

        debug!("Deleted from {} where {}", table, filter);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn list_tests(&self) -> Result<Vec<MockTest>> {
        self.get_rows("mock_tests?select=*&order=created_at.desc").await
    }

    async fn get_test(&self, id: &str) -> Result<Option<MockTest>> {
        self.get_one(&format!("mock_tests?id=eq.{}&select=*", id)).await
    }

    async fn put_test(&self, test: &MockTest) -> Result<()> {
        self.upsert("mock_tests", "id", test).await
    }

    async fn delete_test(&self, id: &str) -> Result<()> {
        self.delete_where("mock_tests", &format!("id=eq.{}", id)).await
    }

    async fn list_questions(&self, test_id: &str) -> Result<Vec<Question>> {
        self.get_rows(&format!(
            "questions?test_id=eq.{}&select=*&order=question_number.asc",
            test_id
        ))
        .await
    }

    async fn put_question(&self, question: &Question) -> Result<()> {
        self.upsert("questions", "id", question).await
    }

    async fn delete_question(&self, test_id: &str, id: &str) -> Result<()> {
        self.delete_where("questions", &format!("test_id=eq.{}&id=eq.{}", test_id, id))
            .await
    }

    async fn delete_questions(&self, test_id: &str) -> Result<()> {
        self.delete_where("questions", &format!("test_id=eq.{}", test_id))
            .await
    }

    async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        self.get_rows("access_keys?select=*").await
    }

    async fn put_access_key(&self, key: &AccessKey) -> Result<()> {
        self.upsert("access_keys", "id", key).await
    }

    async fn delete_access_key(&self, id: &str) -> Result<()> {
        self.delete_where("access_keys", &format!("id=eq.{}", id)).await
    }

    async fn list_results(&self, test_id: &str) -> Result<Vec<TestResult>> {
        self.get_rows(&format!("test_attempts?test_id=eq.{}&select=*", test_id))
            .await
    }

    async fn put_result(&self, result: &TestResult) -> Result<()> {
        self.upsert("test_attempts", "id", result).await
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>> {
        self.get_rows("notifications?select=*&order=created_at.desc").await
    }

    async fn put_notification(&self, notification: &Notification) -> Result<()> {
        self.upsert("notifications", "id", notification).await
    }

    async fn delete_notification(&self, id: &str) -> Result<()> {
        self.delete_where("notifications", &format!("id=eq.{}", id)).await
    }

    async fn get_current_affairs(&self, date: &str) -> Result<Option<CurrentAffairsDigest>> {
        self.get_one(&format!("current_affairs?date=eq.{}&select=*", date))
            .await
    }

    async fn list_current_affairs(&self) -> Result<Vec<CurrentAffairsDigest>> {
        self.get_rows("current_affairs?select=*").await
    }

    async fn put_current_affairs(&self, digest: &CurrentAffairsDigest) -> Result<()> {
        self.upsert("current_affairs", "date", digest).await
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.get_rows("subjects?select=*&order=name.asc").await
    }

    async fn put_subject(&self, subject: &Subject) -> Result<()> {
        self.upsert("subjects", "id", subject).await
    }
}
