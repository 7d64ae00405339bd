//! HTTP surface: bearer-token auth, chat lifecycle endpoints, and the
//! SSE streaming endpoint that drives a turn.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::agent;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::pending::PendingMessages;
use crate::schema::SchemaCache;
use crate::traits::{ChatStore, ModelProvider, Tool};
use crate::types::{StreamEvent, UiMessage};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn ChatStore>,
    pub provider: Arc<dyn ModelProvider>,
    pub schema_cache: Arc<SchemaCache>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub pending: PendingMessages,
}

/// User id resolved by the auth middleware.
#[derive(Clone)]
pub struct AuthUser(pub String);

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/create", post(create_chat_handler))
        .route("/api/chat/rename", patch(rename_chat_handler))
        .route(
            "/api/chat/{id}/pending",
            post(stash_pending_handler).get(consume_pending_handler),
        )
        .route("/api/chats", get(list_chats_handler))
        .route("/api/chats/{id}/messages", get(list_messages_handler))
        .route("/api/chats/{id}", delete(delete_chat_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let user_id = state
        .config
        .auth
        .tokens
        .get(token)
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
    #[serde(default)]
    messages: Vec<UiMessage>,
}

/// One chat turn, streamed as SSE. Each event's data payload is one
/// JSON-encoded `StreamEvent`; the stream always ends with `finish`.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let chat_id = body
        .chat_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("chatId requis".to_string()))?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<StreamEvent>();
    let timeout = Duration::from_secs(state.config.chat.request_timeout_secs);

    let turn_tx = tx.clone();
    tokio::spawn(async move {
        let turn = agent::run_turn(state, user_id, chat_id, body.messages, turn_tx.clone());
        if tokio::time::timeout(timeout, turn).await.is_err() {
            warn!("Chat turn timed out");
            let _ = turn_tx.send(StreamEvent::Error {
                message: "Délai dépassé pour cette requête.".to_string(),
            });
            let _ = turn_tx.send(StreamEvent::Finish);
        }
    });
    drop(tx);

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialization"}"#.to_string());
        Ok::<_, Infallible>(Event::default().data(data))
    });

    Ok(Sse::new(stream))
}

#[derive(Deserialize)]
struct CreateChatRequest {
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
    message: Option<String>,
}

/// Create a chat under a client-generated id so the browser can navigate
/// to it before the first turn. An optional first message is stashed for
/// the chat page to replay.
async fn create_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<CreateChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = body
        .chat_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("chatId requis".to_string()))?;

    state.store.upsert_chat(&chat_id, &user_id).await?;

    if let Some(message) = body.message.as_deref().filter(|m| !m.trim().is_empty()) {
        state.pending.stash(&chat_id, &user_id, message).await;
    }

    info!(chat_id, "Chat created");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct RenameChatRequest {
    #[serde(rename = "chatId")]
    chat_id: String,
    title: String,
}

async fn rename_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<RenameChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("titre requis".to_string()));
    }

    let renamed = state
        .store
        .rename_chat(&body.chat_id, &user_id, title)
        .await?;
    if renamed == 0 {
        return Err(ApiError::NotFound("conversation introuvable".to_string()));
    }

    Ok(Json(json!({ "ok": true })))
}

async fn list_chats_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let chats = state.store.list_chats(&user_id).await?;
    Ok(Json(json!({ "chats": chats })))
}

async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // A chat owned by someone else looks identical to a missing one.
    let chat = state
        .store
        .get_chat(&chat_id)
        .await?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound("conversation introuvable".to_string()))?;

    let messages = state.store.list_messages(&chat.id).await?;
    Ok(Json(json!({ "chat": chat, "messages": messages })))
}

async fn delete_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.delete_chat(&chat_id, &user_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("conversation introuvable".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct StashPendingRequest {
    message: String,
}

async fn stash_pending_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
    Json(body): Json<StashPendingRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message requis".to_string()));
    }

    // Only the chat's owner may park a message on it.
    state
        .store
        .get_chat(&chat_id)
        .await?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound("conversation introuvable".to_string()))?;

    state.pending.stash(&chat_id, &user_id, &body.message).await;
    Ok(Json(json!({ "ok": true })))
}

async fn consume_pending_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let message = state.pending.consume(&chat_id, &user_id).await;
    Ok(Json(json!({ "message": message })))
}

pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    let app = build_router(state);

    let ip: std::net::IpAddr = bind
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let addr = std::net::SocketAddr::new(ip, port);
    info!("Chat server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
