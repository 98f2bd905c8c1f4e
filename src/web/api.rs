use crate::query::{QueryError, QueryService};
use crate::storage::SearchFilter;
use crate::window::event::{RawEvent, StreamKey};
use crate::window::manager::{ManagerStats, WindowManager, WindowStatus};
use crate::window::types::EmbeddedWindow;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
    pub managers: Arc<Vec<WindowManager>>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restrict retrieval to one stream key, e.g. `orders_0`
    #[serde(default)]
    pub stream_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceRef {
    pub window_id: String,
    pub stream_key: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct StreamWindows {
    pub name: String,
    pub stats: ManagerStats,
    pub windows: Vec<WindowStatus>,
}

#[derive(Debug, Serialize)]
pub struct WindowsResponse {
    pub streams: Vec<StreamWindows>,
}

/// A stored window as returned by the API, without its embedding vector
#[derive(Debug, Serialize)]
pub struct StoredWindowResponse {
    pub window_id: String,
    pub stream_key: StreamKey,
    pub partition: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_count: usize,
    pub context_text: String,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_events: Option<Vec<RawEvent>>,
}

impl From<EmbeddedWindow> for StoredWindowResponse {
    fn from(window: EmbeddedWindow) -> Self {
        Self {
            dimensions: window.embedding.len(),
            window_id: window.window_id,
            stream_key: window.stream_key,
            partition: window.partition,
            start_time: window.start_time,
            end_time: window.end_time,
            event_count: window.event_count,
            context_text: window.context_text,
            raw_events: window.raw_events,
        }
    }
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /query
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let filter = match request.stream_key {
        Some(key) if !key.is_empty() => SearchFilter::for_stream(StreamKey::from(key)),
        _ => SearchFilter::default(),
    };

    let answer = state
        .query
        .answer(&request.prompt, request.top_k, &filter)
        .await?;

    Ok(Json(QueryResponse {
        answer: answer.text,
        sources: answer
            .sources
            .into_iter()
            .map(|hit| SourceRef {
                window_id: hit.window.window_id,
                stream_key: hit.window.stream_key.to_string(),
                score: hit.score,
            })
            .collect(),
    }))
}

/// GET /api/windows
pub async fn list_open_windows(State(state): State<AppState>) -> Json<WindowsResponse> {
    let streams = state
        .managers
        .iter()
        .map(|manager| StreamWindows {
            name: manager.policy().name.clone(),
            stats: manager.stats(),
            windows: manager.snapshot(),
        })
        .collect();

    Json(WindowsResponse { streams })
}

/// GET /api/windows/:id
pub async fn get_stored_window(
    State(state): State<AppState>,
    Path(window_id): Path<String>,
) -> Result<Json<StoredWindowResponse>, ApiError> {
    let stored = state
        .query
        .store()
        .get_window(&window_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    match stored {
        Some(window) => Ok(Json(StoredWindowResponse::from(window))),
        None => Err(ApiError::NotFound(format!("window '{}' not found", window_id))),
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    InternalError(String),
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::EmptyPrompt | QueryError::InvalidTopK => ApiError::BadRequest(e.to_string()),
            QueryError::Embed(_) | QueryError::Generate(_) => {
                error!(error = %e, "Inference backend failed during query");
                ApiError::BadGateway(e.to_string())
            }
            QueryError::Search(_) => {
                error!(error = %e, "Window search failed during query");
                ApiError::InternalError(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
