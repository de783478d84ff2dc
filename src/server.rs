//! HTTP and WebSocket surface
//!
//! Thin axum layer over the orchestrator: chat requests go through
//! `handle_message`, monitoring endpoints read session snapshots, and
//! the WebSocket pushes event envelopes filtered to its session while
//! accepting inbound requirement updates.

use crate::error::Result;
use crate::orchestrator::{ChatOrchestrator, ChatResponse};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Body of `POST /chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

/// Inbound WebSocket envelope
#[derive(Debug, Deserialize)]
struct InboundWsMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    message: Option<String>,
}

/// Builds the application router
pub fn router(orchestrator: Arc<ChatOrchestrator>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/sessions/:session_id/status", get(session_status))
        .route("/sessions/:session_id/history", get(session_history))
        .route("/ws/:session_id", get(ws_upgrade))
        .with_state(orchestrator)
}

/// Serves the API on the configured bind address
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn serve(orchestrator: Arc<ChatOrchestrator>, bind_address: &str) -> Result<()> {
    let sweeper = orchestrator.manager().spawn_sweeper();
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(%bind_address, "Server listening");

    let result = axum::serve(listener, router(orchestrator)).await;
    sweeper.abort();
    result?;
    Ok(())
}

async fn chat(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let response = orchestrator
        .handle_message(&request.session_id, &request.message)
        .await;
    Json(response)
}

async fn health(State(orchestrator): State<Arc<ChatOrchestrator>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_sessions": orchestrator.manager().session_count().await,
    }))
}

async fn session_status(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    Path(session_id): Path<String>,
) -> Response {
    match orchestrator.manager().get(&session_id).await {
        Some(session) => Json(session.lock().await.snapshot()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"session_id": session_id, "status": "not_found"})),
        )
            .into_response(),
    }
}

async fn session_history(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    Path(session_id): Path<String>,
) -> Response {
    match orchestrator.manager().get(&session_id).await {
        Some(session) => {
            let guard = session.lock().await;
            Json(json!({
                "session_id": session_id,
                "messages": guard.history(),
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"session_id": session_id, "status": "not_found"})),
        )
            .into_response(),
    }
}

async fn ws_upgrade(
    State(orchestrator): State<Arc<ChatOrchestrator>>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, orchestrator, session_id))
}

async fn handle_socket(
    mut socket: WebSocket,
    orchestrator: Arc<ChatOrchestrator>,
    session_id: String,
) {
    info!(session_id, "WebSocket connected");
    let mut events = orchestrator.events().subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                let envelope = match event {
                    Ok(envelope) => envelope,
                    // Lagged subscribers skip to the live edge
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id, skipped, "WebSocket subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if envelope.session_id != session_id {
                    continue;
                }
                let Ok(payload) = serde_json::to_string(&envelope) else {
                    continue;
                };
                if socket.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_inbound(&orchestrator, &session_id, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(session_id, %error, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }
    info!(session_id, "WebSocket disconnected");
}

async fn handle_inbound(orchestrator: &ChatOrchestrator, session_id: &str, text: &str) {
    let Ok(inbound) = serde_json::from_str::<InboundWsMessage>(text) else {
        debug!(session_id, "Ignoring non-JSON WebSocket message");
        return;
    };
    if inbound.message_type != "update_requirements" {
        debug!(session_id, message_type = %inbound.message_type, "Ignoring WebSocket message");
        return;
    }
    let Some(message) = inbound.message.filter(|m| !m.is_empty()) else {
        return;
    };
    if !orchestrator.update_requirements(session_id, &message).await {
        warn!(session_id, "Requirements update for session with no live workflow");
    }
}
