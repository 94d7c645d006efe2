//! HTTP adapter over [`Runtime`].
//!
//! - `POST /chat` `{message, session_id?}` returns the session id as a JSON string
//! - `GET /sessions/:id` returns the session with its messages
//! - `GET /health`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::SwitchboardError;
use crate::items::{Message, USER_SOURCE};
use crate::runtime::Runtime;
use crate::session::{Session, SessionId, SessionStatus};

pub type AppState = Arc<Runtime>;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub content: String,
    pub source: String,
    pub role: String,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let source = message.source().to_string();
        let role = if source == USER_SOURCE { "user" } else { "assistant" };
        Self {
            content: message.content(),
            role: role.to_string(),
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub current_agent: String,
    pub status: SessionStatus,
    pub messages: Vec<MessageView>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            current_agent: session.current_agent.clone(),
            status: session.status,
            messages: session.messages().iter().map(MessageView::from).collect(),
        }
    }
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<SwitchboardError> for AppError {
    fn from(err: SwitchboardError) -> Self {
        match err {
            SwitchboardError::UnknownSession(id) => {
                AppError::NotFound(format!("Session not found: {id}"))
            }
            other => {
                error!(error = %other, "request failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/sessions/:id", get(get_session))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until the listener fails or `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn chat(
    State(runtime): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<String>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".into()));
    }
    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .map(SessionId::from);
    let id = runtime.submit(&request.message, session_id).await?;
    Ok(Json(id.to_string()))
}

async fn get_session(
    State(runtime): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let session = runtime
        .session(&SessionId::from(id.as_str()))
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {id}")))?;
    Ok(Json(SessionView::from(&session)))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
