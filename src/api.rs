//! HTTP router for the capture bridge
//!
//! Exposes ingestion and every read operation of [`CaptureBridge`] as a
//! single axum `Router` with CORS and request tracing.
//!
//! ## Endpoint Map
//!
//! | Route                            | Description                          |
//! |----------------------------------|--------------------------------------|
//! | `POST /live-session`             | Ingest one captured session          |
//! | `GET /api/sessions`              | Listing, newest first                |
//! | `GET /api/sessions/search`       | Filtered recent-first search         |
//! | `GET /api/session/:id`           | Session detail with risk analysis    |
//! | `GET /api/sessions/headers/:id`  | Request and response headers         |
//! | `GET /api/sessions/body/:id`     | Bodies with preview or extraction    |
//! | `GET /api/sessions/timeline`     | Traffic buckets                      |
//! | `GET /api/sessions/export`       | JSON, CSV or HAR export              |
//! | `GET /api/stats`                 | Buffer occupancy and rates           |
//! | `POST /api/sessions/clear`       | Empty the buffers                    |
//! | `GET /api/threat-hunt`           | URL and host hunting rules           |
//! | `GET /api/sessions/ekfiddle`     | Annotated sessions with analysis     |
//! | `GET /api/sessions/ekfiddle/:id` | Annotation analysis of one session   |
//! | `GET /api/sessions/ekfiddle/threats` | High-scoring annotated threats   |
//! | `GET /health`                    | Liveness check                       |

use crate::bridge::intel::{parse_categories, AnnotatedRequest, HuntRequest, ThreatRequest};
use crate::bridge::views::{
    BodyOptions, BodyView, ExportFormat, ExportRequest, HeadersView, SessionDetail,
    SessionOverview,
};
use crate::bridge::{CaptureBridge, ClearRequest};
use crate::error::{to_json, Error};
use crate::query::{
    FilterWarning, GroupBy, QueryFilters, QueryOrder, QueryResult, QueryStatistics, TimeBounds,
    TimelineRequest,
};
use crate::risk::{HuntType, SeverityFilter};
use crate::session::{BufferKind, NormalizeOutcome};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for every handler
pub type ApiState = Arc<CaptureBridge>;

/// Build the complete capture bridge HTTP application
pub fn build_app(bridge: ApiState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/live-session", post(ingest_session))
        .route("/api/stats", get(get_stats))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/search", get(search_sessions))
        .route("/api/sessions/timeline", get(get_timeline))
        .route("/api/sessions/export", get(export_sessions))
        .route("/api/sessions/clear", post(clear_sessions))
        .route("/api/session/:id", get(get_session))
        .route("/api/sessions/headers/:id", get(get_headers))
        .route("/api/sessions/body/:id", get(get_body))
        .route("/api/threat-hunt", get(threat_hunt))
        .route("/api/sessions/ekfiddle", get(annotated_sessions))
        .route("/api/sessions/ekfiddle/threats", get(annotation_threats))
        .route("/api/sessions/ekfiddle/:id", get(annotation_detail))
        .with_state(bridge)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
}

// =============================================================================
// Error envelope
// =============================================================================

/// JSON error body: `{"error": {"code", "message"}}`
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

fn error_response(err: &Error) -> (StatusCode, Json<Value>) {
    let (status, body) = match err {
        Error::InvalidFilter { .. } | Error::Config(_) => {
            (StatusCode::BAD_REQUEST, ApiError::bad_request(err.to_string()))
        }
        Error::NotFound(_) => (StatusCode::NOT_FOUND, ApiError::not_found(err.to_string())),
        Error::Io(_) | Error::Csv(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::internal(err.to_string()),
        ),
    };
    (status, Json(to_json(body)))
}

fn not_found(id: &str) -> (StatusCode, Json<Value>) {
    error_response(&Error::NotFound(id.to_string()))
}

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListSessionsQuery {
    limit: Option<usize>,
    #[serde(alias = "minutes")]
    since_minutes: Option<u64>,
    #[serde(alias = "host_filter")]
    host: Option<String>,
    #[serde(alias = "status_code")]
    status: Option<u16>,
    #[serde(default)]
    suspicious_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(alias = "host_pattern")]
    host: Option<String>,
    #[serde(alias = "url_pattern")]
    url: Option<String>,
    method: Option<String>,
    status_min: Option<u16>,
    status_max: Option<u16>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    content_type: Option<String>,
    limit: Option<usize>,
    #[serde(alias = "minutes")]
    since_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimelineQuery {
    group_by: Option<String>,
    #[serde(alias = "time_range_minutes")]
    window_minutes: Option<u64>,
    #[serde(default, alias = "include_details")]
    include_samples: bool,
    #[serde(alias = "filter_host")]
    host_filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    format: Option<String>,
    limit: Option<usize>,
    #[serde(alias = "filter_host")]
    host_filter: Option<String>,
    #[serde(default)]
    include_bodies: bool,
}

#[derive(Debug, Default, Deserialize)]
struct HuntQuery {
    hunt_type: Option<String>,
    #[serde(alias = "since_minutes")]
    time_range: Option<u64>,
    include_analysis: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedQuery {
    limit: Option<usize>,
    #[serde(alias = "since_minutes")]
    time_range: Option<u64>,
    threat_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ThreatQuery {
    #[serde(alias = "since_minutes")]
    time_range: Option<u64>,
    min_risk_score: Option<f64>,
    categories: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClearBody {
    #[serde(default)]
    clear_suspicious: bool,
}

/// Listing and search response
#[derive(Debug, Serialize)]
struct SessionList {
    sessions: Vec<SessionOverview>,
    returned: usize,
    total_matched: usize,
    total_buffered: usize,
    limit: usize,
    buffer: BufferKind,
    statistics: QueryStatistics,
    time_bounds: TimeBounds,
    warnings: Vec<FilterWarning>,
    query: QueryFilters,
}

impl SessionList {
    fn new(result: QueryResult, buffer: BufferKind, query: QueryFilters) -> Self {
        let sessions: Vec<SessionOverview> = result
            .records
            .iter()
            .map(|r| SessionOverview::from_record(r))
            .collect();
        Self {
            returned: sessions.len(),
            sessions,
            total_matched: result.total_matched,
            total_buffered: result.total_buffered,
            limit: result.limit,
            buffer,
            statistics: result.statistics,
            time_bounds: result.time_bounds,
            warnings: result.warnings,
            query,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
async fn health_check(State(bridge): State<ApiState>) -> impl IntoResponse {
    Json(bridge.health().await)
}

/// POST /live-session
async fn ingest_session(State(bridge): State<ApiState>, body: Bytes) -> impl IntoResponse {
    if body.iter().all(u8::is_ascii_whitespace) {
        tracing::warn!("Rejected empty capture payload");
        return (
            StatusCode::BAD_REQUEST,
            Json(to_json(ApiError::new("EMPTY_PAYLOAD", "Request body is empty"))),
        );
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                bytes = body.len(),
                line = e.line(),
                column = e.column(),
                "Rejected malformed capture payload: {}",
                e
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(to_json(ApiError::new(
                    "INVALID_JSON",
                    format!("Malformed JSON: {}", e),
                ))),
            );
        }
    };

    if is_empty_payload(&payload) {
        tracing::warn!("Rejected empty capture payload");
        return (
            StatusCode::BAD_REQUEST,
            Json(to_json(ApiError::new("EMPTY_PAYLOAD", "Payload carries no data"))),
        );
    }

    let receipt = bridge.ingest(&payload).await;
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "ok": true,
            "id": receipt.id,
            "retained": receipt.retained,
            "degraded": receipt.outcome == NormalizeOutcome::Degraded,
        })),
    )
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// GET /api/sessions
async fn list_sessions(
    State(bridge): State<ApiState>,
    Query(params): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let filters = QueryFilters {
        since_minutes: params.since_minutes,
        host_contains: params.host,
        status_min: params.status,
        status_max: params.status,
        limit: params.limit,
        ..Default::default()
    };
    let buffer = if params.suspicious_only {
        BufferKind::Flagged
    } else {
        BufferKind::All
    };

    match bridge.query(&filters, buffer, QueryOrder::Listing).await {
        Ok(result) => (
            StatusCode::OK,
            Json(to_json(SessionList::new(result, buffer, filters))),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/sessions/search
async fn search_sessions(
    State(bridge): State<ApiState>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    let filters = QueryFilters {
        since_minutes: params.since_minutes,
        host_pattern: params.host,
        url_pattern: params.url,
        method: params.method,
        status_min: params.status_min,
        status_max: params.status_max,
        min_size: params.min_size,
        max_size: params.max_size,
        content_type: params.content_type,
        limit: params.limit,
        ..Default::default()
    };

    match bridge.query(&filters, BufferKind::All, QueryOrder::Recent).await {
        Ok(result) => (
            StatusCode::OK,
            Json(to_json(SessionList::new(result, BufferKind::All, filters))),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/session/:id
async fn get_session(State(bridge): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match bridge.get_by_id(&id).await {
        Some(record) => (
            StatusCode::OK,
            Json(to_json(SessionDetail::from_record(&record))),
        ),
        None => not_found(&id),
    }
}

/// GET /api/sessions/headers/:id
async fn get_headers(State(bridge): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match bridge.get_by_id(&id).await {
        Some(record) => (
            StatusCode::OK,
            Json(to_json(HeadersView::from_record(&record))),
        ),
        None => not_found(&id),
    }
}

/// GET /api/sessions/body/:id
async fn get_body(
    State(bridge): State<ApiState>,
    Path(id): Path<String>,
    Query(options): Query<BodyOptions>,
) -> impl IntoResponse {
    match bridge.get_by_id(&id).await {
        Some(record) => {
            let view = BodyView::build(
                &record,
                options,
                bridge.extraction_config(),
                bridge.extractor(),
            );
            (StatusCode::OK, Json(to_json(view)))
        }
        None => not_found(&id),
    }
}

/// GET /api/sessions/timeline
async fn get_timeline(
    State(bridge): State<ApiState>,
    Query(params): Query<TimelineQuery>,
) -> impl IntoResponse {
    let group_by = match params.group_by.as_deref() {
        Some(raw) => match raw.parse::<GroupBy>() {
            Ok(group_by) => group_by,
            Err(message) => return error_response(&Error::invalid_filter("group_by", message)),
        },
        None => GroupBy::default(),
    };
    let request = TimelineRequest {
        group_by,
        window_minutes: params.window_minutes,
        include_samples: params.include_samples,
        host_filter: params.host_filter,
    };

    (
        StatusCode::OK,
        Json(to_json(bridge.aggregate_timeline(&request).await)),
    )
}

/// GET /api/sessions/export
async fn export_sessions(
    State(bridge): State<ApiState>,
    Query(params): Query<ExportQuery>,
) -> impl IntoResponse {
    let format = match params.format.as_deref() {
        Some(raw) => match raw.parse::<ExportFormat>() {
            Ok(format) => format,
            Err(message) => return error_response(&Error::invalid_filter("format", message)),
        },
        None => ExportFormat::default(),
    };
    let request = ExportRequest {
        format,
        limit: params.limit,
        host_filter: params.host_filter,
        include_bodies: params.include_bodies,
    };

    match bridge.export(&request).await {
        Ok(document) => (StatusCode::OK, Json(to_json(document))),
        Err(e) => {
            tracing::error!(error = %e, "Session export failed");
            error_response(&e)
        }
    }
}

/// GET /api/stats
async fn get_stats(State(bridge): State<ApiState>) -> impl IntoResponse {
    Json(bridge.stats().await)
}

/// POST /api/sessions/clear
async fn clear_sessions(
    State(bridge): State<ApiState>,
    body: Option<Json<ClearBody>>,
) -> impl IntoResponse {
    let clear_suspicious = body.map(|Json(b)| b.clear_suspicious).unwrap_or(false);
    let report = bridge
        .clear(ClearRequest {
            all: true,
            flagged: clear_suspicious,
        })
        .await;
    Json(serde_json::json!({
        "ok": true,
        "sessions_cleared": report.sessions_cleared,
        "flagged_cleared": report.flagged_cleared,
    }))
}

/// GET /api/threat-hunt
async fn threat_hunt(
    State(bridge): State<ApiState>,
    Query(params): Query<HuntQuery>,
) -> impl IntoResponse {
    let mut request = HuntRequest::default();
    if let Some(raw) = params.hunt_type.as_deref() {
        match raw.parse::<HuntType>() {
            Ok(hunt_type) => request.hunt_type = hunt_type,
            Err(message) => return error_response(&Error::invalid_filter("hunt_type", message)),
        }
    }
    if let Some(minutes) = params.time_range {
        request.time_range_minutes = minutes;
    }
    if let Some(include) = params.include_analysis {
        request.include_analysis = include;
    }

    (
        StatusCode::OK,
        Json(to_json(bridge.threat_hunt(&request).await)),
    )
}

/// GET /api/sessions/ekfiddle
async fn annotated_sessions(
    State(bridge): State<ApiState>,
    Query(params): Query<AnnotatedQuery>,
) -> impl IntoResponse {
    let mut request = AnnotatedRequest::default();
    if let Some(raw) = params.threat_level.as_deref() {
        match raw.parse::<SeverityFilter>() {
            Ok(level) => request.threat_level = level,
            Err(message) => {
                return error_response(&Error::invalid_filter("threat_level", message))
            }
        }
    }
    if let Some(limit) = params.limit {
        request.limit = limit;
    }
    if let Some(minutes) = params.time_range {
        request.time_range_minutes = minutes;
    }

    (
        StatusCode::OK,
        Json(to_json(bridge.annotated_sessions(&request).await)),
    )
}

/// GET /api/sessions/ekfiddle/:id
async fn annotation_detail(
    State(bridge): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match bridge.annotation_detail(&id).await {
        Some(detail) => (StatusCode::OK, Json(to_json(detail))),
        None => not_found(&id),
    }
}

/// GET /api/sessions/ekfiddle/threats
async fn annotation_threats(
    State(bridge): State<ApiState>,
    Query(params): Query<ThreatQuery>,
) -> impl IntoResponse {
    let mut request = ThreatRequest::default();
    if let Some(raw) = params.categories.as_deref() {
        match parse_categories(raw) {
            Ok(categories) => request.categories = categories,
            Err(e) => return error_response(&e),
        }
    }
    if let Some(score) = params.min_risk_score {
        request.min_risk_score = score;
    }
    if let Some(minutes) = params.time_range {
        request.time_range_minutes = minutes;
    }

    match bridge.annotation_threats(&request).await {
        Ok(report) => (StatusCode::OK, Json(to_json(report))),
        Err(e) => error_response(&e),
    }
}

// =============================================================================
// CORS
// =============================================================================

/// Build CORS layer from configured origins
fn build_cors(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::ACCEPT];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
    }
}
