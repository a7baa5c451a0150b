//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ErrorResponse, IncomingRequest, IncomingResponse, NotificationListResponse, SessionResponse,
    TreeListResponse, TreeSummary,
};
use super::AppState;
use crate::runtime::{EngineError, EntryStore, SessionStore};
use crate::state_machine::Session;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Gateway traffic
        .route("/api/incoming", post(post_incoming))
        .route("/api/outbound/stream", get(stream_outbound))
        // Inspection
        .route("/api/sessions/:id", get(get_session))
        .route("/api/connections/:id/session", get(get_connection_session))
        .route("/api/trees", get(list_trees))
        .route("/api/notifications/pending", get(list_pending_notifications))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Gateway
// ============================================================

async fn post_incoming(
    State(state): State<AppState>,
    Json(req): Json<IncomingRequest>,
) -> Result<Json<IncomingResponse>, AppError> {
    if req.connection_id.trim().is_empty() {
        return Err(AppError::BadRequest("connection_id is required".to_string()));
    }

    let report = state
        .manager
        .handle_incoming(&req.connection_id, &req.text)
        .await
        .map_err(|e| match e {
            EngineError::Transition(_) => {
                AppError::Internal(format!("Survey configuration error: {e}"))
            }
            other => AppError::Internal(other.to_string()),
        })?;

    Ok(Json(IncomingResponse {
        handled: report.handled,
        replies: report.replies,
        delivery_failures: report.delivery_failures,
    }))
}

async fn stream_outbound(State(state): State<AppState>) -> impl IntoResponse {
    sse_stream(
        state.transport.subscribe(),
        state.manager.subscribe_session_ended(),
    )
}

// ============================================================
// Inspection
// ============================================================

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let storage = state.manager.storage();
    let session = storage
        .get_session(&id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {id}")))?;
    let entries = storage
        .get_entries(&id)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(SessionResponse { session, entries }))
}

async fn get_connection_session(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<Session>, AppError> {
    state
        .manager
        .storage()
        .find_open_session(&connection_id)
        .await
        .map_err(AppError::Internal)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No open session for {connection_id}")))
}

async fn list_trees(State(state): State<AppState>) -> Json<TreeListResponse> {
    let trees = state
        .manager
        .context()
        .catalog
        .trees()
        .iter()
        .map(|tree| TreeSummary {
            trigger: tree.trigger.clone(),
            root_state: tree.root_state.clone(),
            summary: tree.summary.clone(),
        })
        .collect();
    Json(TreeListResponse { trees })
}

async fn list_pending_notifications(
    State(state): State<AppState>,
) -> Result<Json<NotificationListResponse>, AppError> {
    let notifications = state
        .db
        .pending_notifications()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(NotificationListResponse { notifications }))
}

async fn get_version() -> &'static str {
    concat!("decision-survey ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
