//! REST API handlers.

use super::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::agent::ClientConfig;
use crate::persistence::traits::validate_session_id;
use crate::sessions::{Attachment, SessionError};

// ── Errors ──────────────────────────────────────────────────────

/// Handler failure mapped onto an HTTP status. Internal details are logged
/// and never returned to the client.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    NotConnected(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotConnected(id) => Self::NotConnected(id),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Self::NotConnected(id) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("session {id} is not connected"),
            ),
            Self::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn checked_id(session_id: &str) -> ApiResult<&str> {
    validate_session_id(session_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(session_id)
}

// ── Bodies ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SummaryBody {
    pub summary: String,
}

#[derive(Deserialize)]
pub struct PromptBody {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptAccepted {
    pub message_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub connection: &'static str,
    pub store_backend: String,
    pub active_sessions: usize,
}

// ── Handlers ────────────────────────────────────────────────────

/// GET /api/status
pub async fn handle_status(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        connection: state.connection.status().as_str(),
        store_backend: state.store.name().to_string(),
        active_sessions: state.registry.active_count(),
    })
}

/// GET /api/client-config
pub async fn handle_client_config_get(
    State(state): State<AppState>,
) -> ApiResult<Json<ClientConfig>> {
    state
        .store
        .load_client_config()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("client config".into()))
}

/// PUT /api/client-config
pub async fn handle_client_config_put(
    State(state): State<AppState>,
    body: Result<Json<ClientConfig>, JsonRejection>,
) -> ApiResult<Json<ClientConfig>> {
    let Json(config) = body?;
    state.store.save_client_config(&config).await?;
    tracing::info!(transport = config.transport.as_str(), "Client config updated");
    Ok(Json(config))
}

/// GET /api/tools
pub async fn handle_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "tools": state.tools.definitions() }))
}

/// GET /api/sessions
pub async fn handle_sessions_list(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sessions = state.registry.get_all_metadata().await?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

/// GET /api/sessions/{id}
pub async fn handle_session_get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = checked_id(&session_id)?;
    let metadata = state
        .registry
        .get_metadata(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {id}")))?;
    Ok(Json(serde_json::json!({
        "session": metadata,
        "active": state.registry.exists(id),
    })))
}

/// GET /api/sessions/{id}/messages
pub async fn handle_messages_get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = checked_id(&session_id)?;
    let messages = state.store.get_messages(id).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

/// PUT /api/sessions/{id}/summary
pub async fn handle_summary_put(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<SummaryBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = checked_id(&session_id)?;
    let Json(body) = body?;
    let metadata = state
        .registry
        .set_summary(id, body.summary)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {id}")))?;
    Ok(Json(serde_json::json!({ "session": metadata })))
}

/// POST /api/sessions/{id}/messages
pub async fn handle_prompt_send(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<PromptBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = checked_id(&session_id)?;
    let Json(body) = body?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    let message_id = state
        .registry
        .send_prompt(id, &body.prompt, &body.attachments)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(PromptAccepted { message_id })))
}

/// POST /api/sessions/{id}/abort
pub async fn handle_abort(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = checked_id(&session_id)?;
    state.registry.abort(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/sessions/{id}
pub async fn handle_session_delete(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = checked_id(&session_id)?;
    if state.relay.remove(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {id}")))
    }
}
