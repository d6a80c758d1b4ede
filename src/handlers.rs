use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::error::{ApiError, Error};
use crate::health::HealthChecker;
use crate::middleware::RequestId;
use crate::rate_limiter::RateLimiter;
use crate::response::{ApiResponse, ReadyResponse, SaveResponse, StatsResponse};
use crate::stats::StatsAggregator;
use crate::storage::Storage;
use crate::validation::{format_url, SaveRequest};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, limiter: Arc<RateLimiter>) -> Self {
        let health = Arc::new(HealthChecker::new(storage.clone()));
        Self {
            storage,
            limiter,
            health,
        }
    }

    pub fn aggregator(&self) -> StatsAggregator {
        StatsAggregator::new(self.storage.clone(), self.limiter.clone())
    }
}

fn request_id(id: &Option<Extension<RequestId>>) -> &str {
    id.as_ref().map(|Extension(id)| id.0.as_str()).unwrap_or("-")
}

/// Shorten a URL
pub async fn save_url(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    request.validate()?;

    let alias = request.alias_or_random();
    let url = format_url(&request.url);

    match state.storage.save_url(&url, &alias).await {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            info!(request_id = request_id(&id), alias = %alias, "alias already exists");
            return Err(ApiError::Conflict("url already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    info!(request_id = request_id(&id), alias = %alias, url = %url, "url saved");

    Ok((StatusCode::CREATED, Json(SaveResponse::new(alias))))
}

/// Delete a short URL
pub async fn delete_url(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    Path(alias): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.delete_url(&alias).await.map_err(|e| match e {
        Error::NotFound => ApiError::NotFound("url to delete not found".to_string()),
        other => other.into(),
    })?;

    info!(request_id = request_id(&id), alias = %alias, "url deleted");

    Ok(Json(ApiResponse::ok()))
}

/// Redirect an alias to its URL
pub async fn redirect(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    Path(alias): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let url = state.storage.get_url(&alias).await?;

    info!(request_id = request_id(&id), alias = %alias, url = %url, "redirecting");

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, format!("https://{}", url))],
    ))
}

/// Latest persisted statistics with the live request rate
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let statistic = match state.storage.stats().await? {
        Some(stored) => stored.with_rate(state.limiter.current_rate()),
        // Nothing persisted yet, report a live snapshot instead.
        None => state.aggregator().snapshot().await?,
    };

    Ok(Json(StatsResponse::new(statistic)))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse::ready(state.storage.backend())),
        )
            .into_response(),
        Err(e) => ApiError::InternalServerError(e.to_string()).into_response(),
    }
}
