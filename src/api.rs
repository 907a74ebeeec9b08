//! HTTP API endpoints for creating and joining sessions.
//!
//! Gameplay itself happens over the WebSocket; these endpoints only hand out
//! the ids a client needs to connect.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::protocol::SessionSnapshot;
use crate::state::{AppState, ErrorClass, GameError};
use crate::types::{PlayerId, SessionConfig, SessionId};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub msg: String,
}

fn status_for(error: &GameError) -> StatusCode {
    match error.class() {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => match error {
            GameError::NotHost(_) => StatusCode::FORBIDDEN,
            GameError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::CONFLICT,
        },
        ErrorClass::Transient => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Map a game error onto an HTTP status and the same code/msg pair the
/// WebSocket sends
pub fn error_response(error: GameError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(code = error.code(), "Request failed: {}", error);
    }
    (
        status,
        Json(ErrorResponse {
            code: error.code().to_string(),
            msg: error.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Falls back to the server defaults when absent
    #[serde(default)]
    pub config: Option<SessionConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub join_code: String,
    pub config: SessionConfig,
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    match state.create_session(request.config).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(CreateSessionResponse {
                session_id: session.id,
                join_code: session.join_code,
                config: session.config,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub join_code: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinSessionResponse {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub display_name: String,
    pub is_host: bool,
}

/// POST /api/sessions/join
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinSessionRequest>,
) -> Response {
    match state
        .join_session(&request.join_code, &request.display_name)
        .await
    {
        Ok((session, player)) => Json(JoinSessionResponse {
            session_id: session.id,
            player_id: player.id,
            display_name: player.display_name,
            is_host: player.is_host,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, Response> {
    state
        .get_state(&session_id)
        .await
        .map(Json)
        .map_err(error_response)
}
