use crate::AppState;
use crate::coordinator::StyleResult;
use crate::engine::{CacheStats, SiteStatus};
use crate::error::EngineError;
use crate::feedback::{FeedbackStats, FeedbackSummary};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use retroweb_model::{CacheEntry, Era, Feedback, FeedbackPreset, Fingerprint, PageStructure};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/visit", post(handle_visit))
        .route("/api/sites/{domain}/status", get(handle_site_status))
        .route("/api/sites/{domain}/approve", post(handle_approve))
        .route("/api/sites/{domain}/reject", post(handle_reject))
        .route("/api/sites/{domain}/regenerate", post(handle_regenerate))
        .route("/api/sites/{domain}/feedback", post(handle_feedback))
        .route("/api/settings/era", get(handle_get_era).put(handle_set_era))
        .route("/api/feedback", get(handle_feedback_summary))
        .route("/api/feedback/stats", get(handle_feedback_stats))
        .route("/api/cache/stats", get(handle_cache_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Engine error rendered as a JSON body with a matching status code
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidTransition(_) => StatusCode::CONFLICT,
            EngineError::InvalidFeedback(_) | EngineError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("❌ Request failed: {}", self.0);
        } else {
            warn!("Request refused: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRequest {
    pub domain: String,
    pub era: Option<Era>,
    #[serde(default)]
    pub structure: PageStructure,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub era: Era,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackInput {
    pub preset_type: Option<FeedbackPreset>,
    pub free_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub era: Era,
    pub fingerprint: Fingerprint,
    pub feedback: FeedbackInput,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub era: Era,
    pub fingerprint: Fingerprint,
    pub feedback: FeedbackInput,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub domain: Option<String>,
    pub era: Option<Era>,
    #[serde(default = "default_summary_limit")]
    pub limit: usize,
}

fn default_summary_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAck {
    pub recorded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EraSetting {
    pub era: Era,
}

async fn handle_health() -> impl IntoResponse {
    "OK"
}

async fn handle_visit(
    State(state): State<AppState>,
    Json(request): Json<VisitRequest>,
) -> ApiResult<StyleResult> {
    info!("📡 Visit for {}", request.domain);
    let result = state
        .visit(
            &request.domain,
            request.era,
            &request.structure,
            request.timeout_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(result))
}

async fn handle_site_status(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<SiteStatus> {
    Ok(Json(state.get_site_status(&domain).await?))
}

async fn handle_approve(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<EntryRequest>,
) -> ApiResult<CacheEntry> {
    info!("👍 Approve {} ({})", domain, request.era);
    let entry = state
        .approve(&domain, request.era, request.fingerprint)
        .await?;
    Ok(Json(entry))
}

async fn handle_reject(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<EntryRequest>,
) -> ApiResult<CacheEntry> {
    info!("👎 Reject {} ({})", domain, request.era);
    let entry = state
        .reject(&domain, request.era, request.fingerprint)
        .await?;
    Ok(Json(entry))
}

impl FeedbackInput {
    fn into_feedback(self) -> Result<Feedback, EngineError> {
        Ok(Feedback::new(self.preset_type, self.free_text.as_deref(), Utc::now())?)
    }
}

async fn handle_regenerate(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<RegenerateRequest>,
) -> ApiResult<StyleResult> {
    let feedback = request.feedback.into_feedback()?;

    let result = state
        .regenerate_with_feedback(
            &domain,
            request.era,
            request.fingerprint,
            feedback,
            request.timeout_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(result))
}

async fn handle_feedback(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<FeedbackAck> {
    let feedback = request.feedback.into_feedback()?;
    info!("📝 Feedback for {} ({})", domain, request.era);
    state
        .record_feedback(&domain, request.era, request.fingerprint, feedback)
        .await?;
    Ok(Json(FeedbackAck { recorded: true }))
}

async fn handle_get_era(State(state): State<AppState>) -> ApiResult<EraSetting> {
    let era = state.selected_era().await?;
    Ok(Json(EraSetting { era }))
}

async fn handle_set_era(
    State(state): State<AppState>,
    Json(setting): Json<EraSetting>,
) -> ApiResult<EraSetting> {
    state.set_selected_era(setting.era).await?;
    Ok(Json(setting))
}

async fn handle_feedback_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<FeedbackSummary> {
    let summary = state
        .feedback_summary(query.domain.as_deref(), query.era, query.limit)
        .await?;
    Ok(Json(summary))
}

async fn handle_feedback_stats(State(state): State<AppState>) -> ApiResult<FeedbackStats> {
    Ok(Json(state.feedback_stats().await?))
}

async fn handle_cache_stats(State(state): State<AppState>) -> ApiResult<CacheStats> {
    Ok(Json(state.cache_stats().await?))
}
