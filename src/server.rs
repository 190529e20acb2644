//! HTTP surface: extraction endpoints and the platform's admin and student
//! operations.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bank::BankMeta;
use crate::config::Settings;
use crate::credentials::CredentialStore;
use crate::error::{ApiError, ExtractError};
use crate::llm_extract::LlmExtractor;
use crate::openrouter::OpenRouterClient;
use crate::parser::normalize::{lines_from_fragments, FragmentPage};
use crate::pipeline::{self, Extraction, Mode};
use crate::platform::{parse_date_key, LeaderboardEntry, Platform, SyncReport, WeeklySummary};
use crate::schema::{
    AccessKey, AccessKeyInput, AttemptInput, CurrentAffairsDigest, MockTest, Notification,
    NotificationInput, Question, QuestionBank, QuestionInput, Subject, TestInput, TestResult,
};
use crate::store::RecordRef;

const ADMIN_HEADER: &str = "x-admin-secret";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    pub credentials: CredentialStore,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract_upload))
        .route("/extract/fragments", post(extract_fragments))
        .route("/credential", put(save_credential).delete(clear_credential))
        .route("/tests", get(list_tests).post(create_test))
        .route("/tests/import", post(import_bank))
        .route(
            "/tests/:id",
            get(get_test).put(update_test).delete(delete_test),
        )
        .route("/tests/:id/export", get(export_bank))
        .route(
            "/tests/:id/questions",
            get(list_questions).post(add_question),
        )
        .route(
            "/tests/:id/questions/:qid",
            put(update_question).delete(delete_question),
        )
        .route("/tests/:id/results", post(submit_attempt))
        .route("/tests/:id/leaderboard", get(leaderboard))
        .route("/access-keys", get(list_access_keys).post(create_access_key))
        .route("/access-keys/validate", post(validate_access_key))
        .route(
            "/access-keys/:id",
            put(set_access_key_active).delete(delete_access_key),
        )
        .route(
            "/notifications",
            get(active_notifications).post(create_notification),
        )
        .route("/notifications/:id", delete(delete_notification))
        .route(
            "/current-affairs/:date",
            get(get_current_affairs).put(put_current_affairs),
        )
        .route("/current-affairs/week/:date", get(weekly_summary))
        .route("/subjects", get(list_subjects))
        .route("/sync", get(pending_sync).post(run_sync))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build state from settings and serve until shutdown.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let platform = Platform::from_settings(&settings)?;
    let credentials = CredentialStore::open(settings.credential_path.clone())?;
    if credentials.get().is_some() {
        info!("Loaded LLM credential from {:?}", credentials.path());
    }
    if settings.admin_secret.is_none() {
        warn!("ADMIN_SECRET not set, admin endpoints are open");
    }

    let bind_addr = settings.bind_addr.clone();
    let state = AppState {
        platform,
        credentials,
        settings: Arc::new(settings),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Admin calls must carry the shared secret when one is configured.
fn authorize(settings: &Settings, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = settings.admin_secret.as_deref() else {
        return Ok(());
    };
    match headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == secret => Ok(()),
        _ => Err(ApiError::Unauthorized(format!(
            "missing or wrong {} header",
            ADMIN_HEADER
        ))),
    }
}

/// AI extraction spends the saved LLM credential, so it is an admin call.
fn authorize_mode(settings: &Settings, headers: &HeaderMap, mode: Mode) -> Result<(), ApiError> {
    match mode {
        Mode::Ai => authorize(settings, headers),
        Mode::Regex => Ok(()),
    }
}

/// Questions as served to students: answers are withheld.
fn student_view(mut questions: Vec<Question>) -> Vec<Question> {
    for question in &mut questions {
        question.correct_option = None;
    }
    questions
}

fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    parse_date_key(s)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date '{}', expected YYYYMMDD", s)))
}

/// LLM extractor from the saved credential, falling back to the environment.
fn llm_extractor(state: &AppState) -> Option<LlmExtractor> {
    let client = match state.credentials.require() {
        Ok(key) => OpenRouterClient::new(key),
        Err(_) => OpenRouterClient::from_env()?,
    };
    Some(LlmExtractor::new(
        client,
        state.platform.parser_config().llm_char_budget,
    ))
}

// ============================================================================
// Extraction
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    mode: Mode,
    title: Option<String>,
    title_hi: Option<String>,
    subject: Option<String>,
    time: Option<u32>,
    source: Option<String>,
}

impl ExtractQuery {
    fn meta(&self) -> BankMeta {
        BankMeta {
            title_en: self.title.clone().unwrap_or_default(),
            title_hi: self.title_hi.clone().filter(|s| !s.trim().is_empty()),
            subject: self.subject.clone().unwrap_or_default(),
            time_limit_minutes: self.time,
            source: self.source.clone(),
        }
    }
}

/// `{success: true, ...}` on success. AI-mode failures are reported in the
/// body as `{success: false, error}`; regex-mode failures are HTTP errors.
fn extraction_body(
    mode: Mode,
    result: Result<Extraction, ExtractError>,
) -> Result<Json<Value>, ApiError> {
    match result {
        Ok(extraction) => {
            let mut body = serde_json::to_value(&extraction).map_err(anyhow::Error::from)?;
            body["success"] = json!(true);
            Ok(Json(body))
        }
        Err(e) if mode == Mode::Ai => {
            error!("AI extraction failed: {}", e);
            Ok(Json(json!({ "success": false, "error": e.to_string() })))
        }
        Err(e) => Err(e.into()),
    }
}

/// Upload a document and build a question bank from it.
async fn extract_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExtractQuery>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    authorize_mode(&state.settings, &headers, query.mode)?;

    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    info!(
        "Received file: {} ({} bytes), mode {:?}",
        filename,
        file_data.len(),
        query.mode
    );

    let llm = match query.mode {
        Mode::Ai => llm_extractor(&state),
        Mode::Regex => None,
    };
    let result = pipeline::extract_document(
        &filename,
        &file_data,
        query.mode,
        query.meta(),
        state.platform.parser_config(),
        llm.as_ref(),
    )
    .await;

    extraction_body(query.mode, result)
}

#[derive(Debug, Deserialize)]
struct FragmentsRequest {
    pages: Vec<FragmentPage>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_hi: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    time: Option<u32>,
}

/// Build a bank from positioned text fragments (client-side PDF reading).
async fn extract_fragments(
    State(state): State<AppState>,
    Json(request): Json<FragmentsRequest>,
) -> Result<Json<Value>, ApiError> {
    let config = state.platform.parser_config();
    let lines = lines_from_fragments(&request.pages, config.line_break_threshold);
    info!(
        "Received {} pages of fragments ({} lines)",
        request.pages.len(),
        lines.len()
    );

    let meta = BankMeta {
        title_en: request.title.unwrap_or_default(),
        title_hi: request.title_hi,
        subject: request.subject.unwrap_or_default(),
        time_limit_minutes: request.time,
        source: None,
    };
    extraction_body(Mode::Regex, pipeline::extract_lines(&lines, meta, config))
}

#[derive(Debug, Deserialize)]
struct CredentialInput {
    api_key: String,
}

async fn save_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CredentialInput>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.credentials.save(&input.api_key)?;
    Ok(Json(json!({ "success": true })))
}

async fn clear_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.credentials.clear()?;
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Tests and questions
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListTestsQuery {
    #[serde(default)]
    include_drafts: bool,
}

/// Active tests for students; drafts too for admins that ask for them.
async fn list_tests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListTestsQuery>,
) -> Result<Json<Vec<MockTest>>, ApiError> {
    if query.include_drafts {
        authorize(&state.settings, &headers)?;
    }
    Ok(Json(state.platform.list_tests(query.include_drafts).await))
}

async fn create_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TestInput>,
) -> Result<Json<MockTest>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.create_test(input).await?))
}

async fn get_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MockTest>, ApiError> {
    Ok(Json(state.platform.get_test(&id).await?))
}

async fn update_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<TestInput>,
) -> Result<Json<MockTest>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.update_test(&id, input).await?))
}

async fn delete_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.platform.delete_test(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn import_bank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(bank): Json<QuestionBank>,
) -> Result<Json<MockTest>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.import_bank(bank).await?))
}

async fn export_bank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<QuestionBank>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.export_bank(&id).await?))
}

/// Full questions for admins; answers stripped for everyone else.
async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<Question>>, ApiError> {
    let questions = state.platform.list_questions(&id).await?;
    if authorize(&state.settings, &headers).is_ok() {
        Ok(Json(questions))
    } else {
        Ok(Json(student_view(questions)))
    }
}

async fn add_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<QuestionInput>,
) -> Result<Json<Question>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.add_question(&id, input).await?))
}

async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, qid)): Path<(String, String)>,
    Json(input): Json<QuestionInput>,
) -> Result<Json<Question>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.update_question(&id, &qid, input).await?))
}

async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, qid)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.platform.delete_question(&id, &qid).await?;
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Results
// ============================================================================

async fn submit_attempt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(attempt): Json<AttemptInput>,
) -> Result<Json<TestResult>, ApiError> {
    Ok(Json(state.platform.submit_attempt(&id, attempt).await?))
}

async fn leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<LeaderboardEntry>> {
    Json(state.platform.leaderboard(&id).await)
}

// ============================================================================
// Access keys
// ============================================================================

#[derive(Debug, Deserialize)]
struct ValidateKeyInput {
    code: String,
}

async fn validate_access_key(
    State(state): State<AppState>,
    Json(input): Json<ValidateKeyInput>,
) -> Json<Value> {
    let valid = state.platform.validate_access_key(&input.code).await;
    Json(json!({ "valid": valid }))
}

async fn list_access_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccessKey>>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.list_access_keys().await?))
}

async fn create_access_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<AccessKeyInput>,
) -> Result<Json<AccessKey>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.create_access_key(input).await?))
}

#[derive(Debug, Deserialize)]
struct KeyStatusInput {
    is_active: bool,
}

async fn set_access_key_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<KeyStatusInput>,
) -> Result<Json<AccessKey>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(
        state
            .platform
            .set_access_key_active(&id, input.is_active)
            .await?,
    ))
}

async fn delete_access_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.platform.delete_access_key(&id).await?;
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Notifications, current affairs, subjects
// ============================================================================

async fn active_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.platform.active_notifications(Utc::now()).await)
}

async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<NotificationInput>,
) -> Result<Json<Notification>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.create_notification(input).await?))
}

async fn delete_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.settings, &headers)?;
    state.platform.delete_notification(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_current_affairs(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<CurrentAffairsDigest>, ApiError> {
    let day = parse_date(&date)?;
    state
        .platform
        .current_affairs(day)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no current affairs for {}", date)))
}

async fn put_current_affairs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(date): Path<String>,
    Json(digest): Json<CurrentAffairsDigest>,
) -> Result<Json<CurrentAffairsDigest>, ApiError> {
    authorize(&state.settings, &headers)?;
    let day = parse_date(&date)?;
    Ok(Json(state.platform.put_current_affairs(day, digest).await?))
}

async fn weekly_summary(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<WeeklySummary>, ApiError> {
    let end = parse_date(&date)?;
    Ok(Json(state.platform.weekly_summary(end).await))
}

async fn list_subjects(State(state): State<AppState>) -> Json<Vec<Subject>> {
    Json(state.platform.list_subjects().await)
}

// ============================================================================
// Sync
// ============================================================================

async fn pending_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RecordRef>>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.pending_sync()))
}

async fn run_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SyncReport>, ApiError> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.platform.sync().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParserConfig, StoreKind};
    use crate::schema::OptionLetter;
    use crate::store::LocalStore;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use std::path::PathBuf;

    fn settings(admin_secret: Option<&str>) -> Settings {
        Settings {
            bind_addr: "127.0.0.1:0".to_string(),
            primary: StoreKind::Local,
            mirror: None,
            local_store_path: PathBuf::from("unused.json"),
            credential_path: PathBuf::from("unused"),
            admin_secret: admin_secret.map(String::from),
            parser: ParserConfig::default(),
        }
    }

    #[test]
    fn test_admin_secret_checked_when_set() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&settings(None), &headers).is_ok());

        let locked = settings(Some("s3cret"));
        let err = authorize(&locked, &headers).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        headers.insert(ADMIN_HEADER, HeaderValue::from_static("wrong"));
        assert!(authorize(&locked, &headers).is_err());

        headers.insert(ADMIN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(authorize(&locked, &headers).is_ok());
    }

    #[test]
    fn test_ai_extraction_is_admin_only() {
        let locked = settings(Some("s3cret"));
        let mut headers = HeaderMap::new();
        assert!(authorize_mode(&locked, &headers, Mode::Regex).is_ok());
        assert!(authorize_mode(&locked, &headers, Mode::Ai).is_err());

        headers.insert(ADMIN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(authorize_mode(&locked, &headers, Mode::Ai).is_ok());
    }

    #[tokio::test]
    async fn test_students_do_not_see_answers() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::new(
            Arc::new(LocalStore::new()),
            None,
            ParserConfig::default(),
        );
        let state = AppState {
            platform: platform.clone(),
            credentials: CredentialStore::open(dir.path().join("key")).unwrap(),
            settings: Arc::new(settings(Some("s3cret"))),
        };

        let input: TestInput =
            serde_json::from_value(json!({ "title_en": "Polity", "subject": "Polity" })).unwrap();
        let test = platform.create_test(input).await.unwrap();
        platform
            .add_question(
                &test.id,
                QuestionInput {
                    question_text_en: "Who chairs the Rajya Sabha?".to_string(),
                    option_a_en: "Vice President".to_string(),
                    option_b_en: "Speaker".to_string(),
                    correct_option: Some(OptionLetter::A),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let Json(student) = list_questions(
            State(state.clone()),
            HeaderMap::new(),
            Path(test.id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(student[0].correct_option, None);

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_HEADER, HeaderValue::from_static("s3cret"));
        let Json(admin) = list_questions(State(state), headers, Path(test.id)).await.unwrap();
        assert_eq!(admin[0].correct_option, Some(OptionLetter::A));
    }

    #[test]
    fn test_ai_failure_reported_in_body() {
        let Json(body) = extraction_body(Mode::Ai, Err(ExtractError::Empty)).unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("no questions found in document"));

        let err = extraction_body(Mode::Regex, Err(ExtractError::Empty)).unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_extract_query_meta() {
        let query: ExtractQuery =
            serde_json::from_value(json!({ "mode": "ai", "title": "Polity", "time": 45 })).unwrap();
        assert_eq!(query.mode, Mode::Ai);
        let meta = query.meta();
        assert_eq!(meta.title_en, "Polity");
        assert_eq!(meta.time_limit_minutes, Some(45));
        assert!(meta.title_hi.is_none());
    }

    #[test]
    fn test_parse_date_accepts_both_forms() {
        assert!(parse_date("20240301").is_ok());
        assert!(parse_date("2024-03-01").is_ok());
        assert!(parse_date("yesterday").is_err());
    }
}
