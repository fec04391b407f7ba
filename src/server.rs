//! HTTP surface for the UI collaborator.
//!
//! The UI posts events (`send_message`, `send_command`, `set_name`) to a
//! session and always gets back the ordered transcript plus the session's
//! identity. Events may carry a monotonically increasing `seq`; replays of
//! an already-processed sequence number are dropped without reprocessing.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coach::Coach;
use crate::engine::session::{Session, SessionStore};

pub struct AppState {
    pub coach: Coach,
    pub sessions: SessionStore,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Inbound event, as the UI sends it.
#[derive(Debug, Deserialize)]
pub struct ChatEvent {
    pub action: String,
    #[serde(default)]
    pub message_or_command: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Caller-supplied idempotency key; see module docs.
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub user_name: String,
    pub messages: Vec<TranscriptEntry>,
}

#[derive(Debug, Serialize)]
struct NewSessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn transcript_of(session: &Session) -> TranscriptResponse {
    TranscriptResponse {
        session_id: session.id.clone(),
        user_name: session.user_name.clone(),
        messages: session
            .messages
            .iter()
            .filter_map(|m| {
                m.content.as_ref().map(|content| TranscriptEntry {
                    role: m.role.clone(),
                    content: content.clone(),
                })
            })
            .collect(),
    }
}

fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("sess-{}", &hex[..10])
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<NewSessionResponse> {
    let session_id = new_session_id();
    state.sessions.get_or_create(&session_id).await;
    Json(NewSessionResponse { session_id })
}

async fn get_transcript(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<TranscriptResponse> {
    let session = state.sessions.get_or_create(&session_id).await;
    let session = session.lock().await;
    Json(transcript_of(&session))
}

async fn post_event(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(event): Json<ChatEvent>,
) -> Response {
    let session = state.sessions.get_or_create(&session_id).await;
    let mut session = session.lock().await;

    if !session.accept_seq(event.seq) {
        tracing::debug!(
            "Dropping replayed event seq={:?} for session {}",
            event.seq,
            session_id
        );
        return Json(transcript_of(&session)).into_response();
    }

    match event.action.as_str() {
        "set_name" => {
            let name = event
                .user_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("User");
            session.user_name = name.to_string();
            tracing::info!("Session {} user name set to {}", session_id, name);
        }
        "send_message" | "send_command" => {
            if let Some(name) = event.user_name.as_deref().map(str::trim) {
                if !name.is_empty() {
                    session.user_name = name.to_string();
                }
            }
            let text = event
                .message_or_command
                .as_deref()
                .map(str::trim)
                .unwrap_or("");
            if !text.is_empty() {
                state.coach.respond(&mut session, text).await;
            }
        }
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Unknown action '{}'", other),
                }),
            )
                .into_response();
        }
    }

    Json(transcript_of(&session)).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id/events", post(post_event))
        .route("/v1/sessions/:id/transcript", get(get_transcript))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> Result<()> {
    let bind_addr = bind_addr
        .parse::<SocketAddr>()
        .context("Invalid bind address (expected host:port)")?;

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("dealercoach listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Server failed")?;
    Ok(())
}
