use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use certlookup::{DataSource, DataSourceError, Record};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn DataSource>,
}

#[derive(Debug, Error)]
enum ApiErrorKind {
    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ApiErrorKind> for AppError {
    fn from(kind: ApiErrorKind) -> Self {
        match kind {
            ApiErrorKind::DataSource(err) => {
                error!(error = %err, "data source request failed");
                AppError::new(StatusCode::BAD_GATEWAY, err.user_message())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

/// A record as served to clients, with the preview URL resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateView {
    #[serde(flatten)]
    record: Record,
    viewer_url: Option<String>,
}

impl From<Record> for CertificateView {
    fn from(record: Record) -> Self {
        Self {
            viewer_url: record.viewer_url(),
            record,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    certificates: Vec<CertificateView>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    count: usize,
    certificates: Vec<CertificateView>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/search", get(search))
        .route("/api/v1/certificates", get(list_certificates))
        .route("/healthz", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let start = Instant::now();
    let records = state
        .source
        .search(&params.q)
        .await
        .map_err(ApiErrorKind::from)?;

    info!(
        event = "api.search",
        query = %params.q,
        match_count = records.len(),
        duration_ms = start.elapsed().as_millis(),
        "search served"
    );

    let certificates: Vec<CertificateView> = records.into_iter().map(Into::into).collect();
    Ok(Json(SearchResponse {
        query: params.q,
        count: certificates.len(),
        certificates,
    }))
}

async fn list_certificates(State(state): State<AppState>) -> ApiResult<Json<ListResponse>> {
    let records = state
        .source
        .fetch_all()
        .await
        .map_err(ApiErrorKind::from)?;

    let certificates: Vec<CertificateView> = records.into_iter().map(Into::into).collect();
    Ok(Json(ListResponse {
        count: certificates.len(),
        certificates,
    }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "source": state.source.kind() })),
    )
}
