//! REST and streaming API handlers
//!
//! Callers identify themselves with the `X-User-Id` header. Authentication
//! happens upstream; this layer only resolves the id to a known user.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics;
use crate::models::{Actor, Role};
use crate::realtime::{BroadcastEvent, Scope};
use crate::scheduler::{CoverageWindow, NewShift, SchedulerError, ShiftChanges};
use crate::storage::StoreError;

use super::app::AppState;

/// Header carrying the acting user's id
pub const USER_ID_HEADER: &str = "x-user-id";

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub instance_id: Uuid,
    pub subscribers: usize,
    pub dispatcher_running: bool,
}

/// Body of a coverage replacement
#[derive(Debug, Deserialize)]
pub struct CoverageRequest {
    pub windows: Vec<CoverageWindow>,
}

/// `?event=<slug>` on the realtime stream
#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub event: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error rendered as `ErrorResponse`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: Option<&'static str>,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::NotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::Forbidden { .. } => StatusCode::FORBIDDEN,
            SchedulerError::InvalidInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SchedulerError::Conflict { .. } => StatusCode::CONFLICT,
            SchedulerError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while handling request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: Some(err.code()),
            message: err.public_message(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        SchedulerError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/api/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // Shifts
        .route("/api/events/{slug}/shifts", post(create_shift))
        .route(
            "/api/events/{slug}/shifts/{shift_id}",
            put(update_shift).delete(delete_shift),
        )
        // Event administration
        .route("/api/events/{slug}/lock", post(lock_event))
        .route("/api/events/{slug}/unlock", post(unlock_event))
        .route(
            "/api/events/{slug}/teams/{team_id}/coverage",
            put(replace_coverage).get(coverage_summary),
        )
        // Realtime stream
        .route("/api/realtime", get(realtime_stream))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Record request count and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Resolve `X-User-Id` to an active user
async fn actor_from(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing X-User-Id header"))?;

    let user_id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::new(StatusCode::UNAUTHORIZED, "Malformed X-User-Id header"))?;

    let user = state
        .store
        .user(user_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Unknown user"))?;

    if !user.is_active {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Account is disabled"));
    }
    if user.role == Role::Dummy {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Placeholder accounts cannot sign in"));
    }

    Ok(Actor::from(&user))
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        instance_id: state.broker.instance_id(),
        subscribers: state.broker.subscriber_count(),
        dispatcher_running: state.engine.dispatcher().is_running(),
    }))
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Shift Handlers
// ============================================================================

async fn create_shift(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NewShift>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let outcome = state.engine.create_shift(&slug, actor, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}

async fn update_shift(
    State(state): State<AppState>,
    Path((slug, shift_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(changes): Json<ShiftChanges>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let outcome = state
        .engine
        .update_shift(&slug, actor, shift_id, changes)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn delete_shift(
    State(state): State<AppState>,
    Path((slug, shift_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let shift = state.engine.delete_shift(&slug, actor, shift_id).await?;
    Ok(Json(ApiResponse::success(shift)))
}

// ============================================================================
// Event Handlers
// ============================================================================

async fn lock_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let event = state.engine.set_event_lock(&slug, actor, true).await?;
    Ok(Json(ApiResponse::success(event)))
}

async fn unlock_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let event = state.engine.set_event_lock(&slug, actor, false).await?;
    Ok(Json(ApiResponse::success(event)))
}

async fn replace_coverage(
    State(state): State<AppState>,
    Path((slug, team_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(request): Json<CoverageRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let requirements = state
        .engine
        .replace_coverage(&slug, actor, team_id, request.windows)
        .await?;
    Ok(Json(ApiResponse::success(requirements)))
}

async fn coverage_summary(
    State(state): State<AppState>,
    Path((slug, team_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let summary = state.engine.coverage_summary(&slug, actor, team_id).await?;
    Ok(Json(ApiResponse::success(summary)))
}

// ============================================================================
// Realtime Handlers
// ============================================================================

fn to_sse(event: &BroadcastEvent) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(json) => SseEvent::default().event(event.kind.as_str()).data(json),
        Err(e) => {
            tracing::warn!(error = %e, kind = %event.kind, "Failed to encode broadcast");
            SseEvent::default().comment("encoding error")
        }
    }
}

/// One JSON object per broadcast until the client disconnects
async fn realtime_stream(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let scope = match query.event {
        Some(slug) => {
            if state.store.event_by_slug(&slug).await?.is_none() {
                return Err(ApiError::new(
                    StatusCode::NOT_FOUND,
                    format!("event not found: {slug}"),
                ));
            }
            Scope::Event(slug)
        }
        None => Scope::All,
    };

    let subscription = state.broker.subscribe(scope.clone()).map_err(|e| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    tracing::debug!(scope = %scope, subscriber = subscription.id(), "Realtime client connected");

    let stream = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse(&event)));

    let keep_alive = Duration::from_secs(state.config.keep_alive_secs);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive)))
}

// ============================================================================
// Notification Handlers
// ============================================================================

async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    let notifications = state.store.notifications_for(actor.id).await?;
    Ok(Json(ApiResponse::success(notifications)))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from(&state, &headers).await?;
    match state.store.mark_notification_read(actor.id, id).await? {
        Some(notification) => Ok(Json(ApiResponse::success(notification))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("notification not found: {id}"),
        )),
    }
}
