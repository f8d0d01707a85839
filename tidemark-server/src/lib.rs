//! In-memory reference server for the Tidemark record API.
//!
//! Implements the contract the sync engine talks to: flat JSON records,
//! `409 {"server_record": ...}` for stale updates, tombstones in the change
//! feed and bearer-token auth on every route. Nothing is persisted.

mod state;

pub use state::{Changes, ServerState, StoredRecord, UpdateOutcome};

use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tidemark_types::parse_timestamp;
use tracing::{debug, info};

const DEFAULT_LIMIT: usize = 500;
const MAX_LIMIT: usize = 1000;

/// Error responses of the API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("stale update")]
    Conflict(StoredRecord),

    #[error("injected failure")]
    Injected(StatusCode),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(record) => {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({ "server_record": record.to_wire() })),
                )
                    .into_response();
            }
            Self::Injected(status) => *status,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    limit: Option<usize>,
    since: Option<String>,
}

async fn require_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented != Some(state.token()) {
        debug!(path = %request.uri().path(), "Rejected request without valid token");
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

fn injected(state: &ServerState) -> ApiResult<()> {
    match state.take_injected() {
        Some(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            debug!(status = code, "Returning injected failure");
            Err(ApiError::Injected(status))
        }
        None => Ok(()),
    }
}

async fn create_record(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    injected(&state)?;
    let record = state.create(payload);
    debug!(id = %record.id, "Created record");
    Ok((StatusCode::CREATED, Json(record.to_wire())))
}

async fn update_record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<Json<Value>> {
    injected(&state)?;
    match state.update(&id, payload) {
        UpdateOutcome::Updated(record) => Ok(Json(record.to_wire())),
        UpdateOutcome::Conflict(current) => {
            info!(id = %id, "Rejected stale update");
            Err(ApiError::Conflict(current))
        }
        UpdateOutcome::NotFound => Err(ApiError::NotFound(id)),
    }
}

async fn delete_record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    injected(&state)?;
    if state.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(id))
    }
}

async fn get_changes(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ChangesQuery>,
) -> ApiResult<Json<Value>> {
    injected(&state)?;
    let since = match query.since.as_deref() {
        Some(raw) => Some(
            parse_timestamp(raw).ok_or_else(|| ApiError::BadRequest(format!("since: {raw}")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let changes = state.changes(since, limit);
    let changed: Vec<Value> = changes.changed.iter().map(StoredRecord::to_wire).collect();
    Ok(Json(json!({ "changed": changed, "deleted": changes.deleted })))
}

async fn post_telemetry(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<Value>,
) -> StatusCode {
    state.push_telemetry(payload);
    StatusCode::ACCEPTED
}

/// Build the HTTP API router over the given state.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/v1/records", post(create_record))
        .route("/api/v1/records/changes", get(get_changes))
        .route("/api/v1/records/{id}", put(update_record).delete(delete_record))
        .route("/api/v1/telemetry", post(post_telemetry))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}
