//! HTTP request handlers

use super::sse::{conversation_stream, turn_stream, InitSnapshot};
use super::types::{
    ChatResponse, CreateChatRequest, CreateChatResponse, DismissResponse, ErrorResponse,
    InitRequest, InitResponse, QueuedResponse, SendMessageRequest, StreamChatRequest,
};
use super::AppState;
use crate::session::SessionError;
use crate::store::StoreError;
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
        // Streaming turn with a caller-supplied history
        .route("/api/chat", post(stream_chat))
        .route("/api/chats", post(create_chat))
        .route("/api/chats/:id", get(get_chat))
        .route("/api/chats/:id/init", post(init_chat))
        .route("/api/chats/:id/messages", post(send_message))
        .route("/api/chats/:id/dismiss", post(dismiss_handoff))
        .route("/api/chats/:id/stream", get(stream_updates))
        .with_state(state)
}

// ============================================================
// Streaming chat
// ============================================================

async fn stream_chat(
    State(state): State<AppState>,
    Json(req): Json<StreamChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = match req.id.as_deref() {
        Some(id) => state.registry.get_or_open(id).await?,
        None => state.registry.ephemeral(),
    };

    let updates = session.subscribe();
    let pending = session.begin_messages(req.messages)?;
    tracing::info!(
        conversation_id = %session.id(),
        persisted = req.id.is_some(),
        "Processing chat turn"
    );
    tokio::spawn(pending.run());

    Ok(turn_stream(updates))
}

// ============================================================
// Conversation lifecycle
// ============================================================

async fn create_chat(
    State(state): State<AppState>,
    body: Option<Json<CreateChatRequest>>,
) -> Result<Json<CreateChatResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let id = state.registry.create(req.id).await?;
    tracing::info!(conversation_id = %id, "Created conversation");
    Ok(Json(CreateChatResponse { id }))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    let session = state.registry.get_or_open(&id).await?;
    let exists = state.registry.store().exists(&id).await?;

    Ok(Json(ChatResponse {
        id,
        exists,
        messages: session.messages(),
        status: session.status(),
        handoff: session.handoff(),
    }))
}

async fn init_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<InitRequest>>,
) -> Result<Json<InitResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = state.registry.get_or_open(&id).await?;

    let (outcome, pending) = session.begin_initialize(req.goal.as_deref())?;
    if let Some(pending) = pending {
        tokio::spawn(pending.run());
    }

    Ok(Json(InitResponse { outcome }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.registry.get_or_open(&id).await?;
    let pending = session.begin_turn(&req.text)?;
    tokio::spawn(pending.run());

    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued: true })))
}

async fn dismiss_handoff(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DismissResponse>, AppError> {
    let session = state.registry.get_or_open(&id).await?;
    session.dismiss_handoff();
    Ok(Json(DismissResponse {
        handoff: session.handoff(),
    }))
}

async fn stream_updates(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.registry.get_or_open(&id).await?;

    // Subscribe before the snapshot so nothing falls between them
    let updates = session.subscribe();
    let init = InitSnapshot {
        messages: session.messages(),
        status: session.status(),
        handoff: session.handoff(),
    };

    Ok(conversation_stream(init, updates))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::EmptyInput => AppError::BadRequest(err.to_string()),
            SessionError::Busy => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId(_) => AppError::NotFound(err.to_string()),
            StoreError::Io(_) | StoreError::Serialization { .. } => {
                tracing::error!(error = %err, "Conversation storage failed");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::session::testing::{test_options, ScriptedModel};
    use crate::session::TurnStatus;
    use crate::store::{ChatStore, InMemoryStore};
    use crate::stream::StreamEvent;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    struct TestServer {
        base: String,
        http: reqwest::Client,
        registry: Arc<crate::registry::SessionRegistry>,
        store: Arc<InMemoryStore>,
    }

    async fn spawn_server(model: Arc<ScriptedModel>) -> TestServer {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(SessionRegistry::new(store.clone(), model, test_options()));
        let registry = state.registry.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            registry,
            store,
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: Value) -> reqwest::Response {
            self.http
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap()
        }

        async fn get_json(&self, path: &str) -> (StatusCode, Value) {
            let resp = self
                .http
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap();
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
            (status, resp.json().await.unwrap())
        }

        async fn wait_idle(&self, id: &str) {
            let session = self.registry.get_or_open(id).await.unwrap();
            let mut status = session.watch_status();
            tokio::time::timeout(
                Duration::from_secs(5),
                status.wait_for(|s| *s == TurnStatus::Idle),
            )
            .await
            .unwrap()
            .unwrap();
        }
    }

    fn reply(text: &str) -> Vec<Result<StreamEvent, crate::llm::ModelError>> {
        vec![
            Ok(StreamEvent::TextDelta(text.to_string())),
            Ok(StreamEvent::Finish),
        ]
    }

    #[tokio::test]
    async fn test_create_then_load_empty_chat() {
        let server = spawn_server(Arc::new(ScriptedModel::new())).await;

        let resp = server.post("/api/chats", json!({})).await;
        assert_eq!(resp.status().as_u16(), 200);
        let id = resp.json::<Value>().await.unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = server.get_json(&format!("/api/chats/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exists"], false);
        assert_eq!(body["messages"], json!([]));
        assert_eq!(body["status"], "idle");
        assert_eq!(body["handoff"], Value::Null);
    }

    #[tokio::test]
    async fn test_send_message_flow() {
        let model = Arc::new(ScriptedModel::new());
        model.push(reply("What does your café sell?"));
        let server = spawn_server(model).await;

        let resp = server
            .post("/api/chats/chat-1/messages", json!({"text": "   "}))
            .await;
        assert_eq!(resp.status().as_u16(), 400);

        let resp = server
            .post("/api/chats/chat-1/messages", json!({"text": "Survey for my café"}))
            .await;
        assert_eq!(resp.status().as_u16(), 202);
        server.wait_idle("chat-1").await;

        let (_, body) = server.get_json("/api/chats/chat-1").await;
        assert_eq!(body["exists"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][1]["content"], "What does your café sell?");
    }

    #[tokio::test]
    async fn test_second_message_while_streaming_conflicts() {
        let model = Arc::new(ScriptedModel::new());
        let release = model.push_gated(
            vec![Ok(StreamEvent::TextDelta("Hmm".into()))],
            vec![Ok(StreamEvent::Finish)],
        );
        let server = spawn_server(model).await;

        let resp = server
            .post("/api/chats/chat-1/messages", json!({"text": "first"}))
            .await;
        assert_eq!(resp.status().as_u16(), 202);

        let resp = server
            .post("/api/chats/chat-1/messages", json!({"text": "second"}))
            .await;
        assert_eq!(resp.status().as_u16(), 409);

        release.notify_one();
        server.wait_idle("chat-1").await;
        let (_, body) = server.get_json("/api/chats/chat-1").await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_init_with_goal_only_once() {
        let model = Arc::new(ScriptedModel::new());
        model.push(reply("Tell me about your customers."));
        let server = spawn_server(model.clone()).await;

        let resp = server
            .post("/api/chats/chat-1/init", json!({"goal": "NPS survey"}))
            .await;
        assert_eq!(resp.json::<Value>().await.unwrap()["outcome"], "sentGoal");
        server.wait_idle("chat-1").await;

        let resp = server
            .post("/api/chats/chat-1/init", json!({"goal": "NPS survey"}))
            .await;
        assert_eq!(
            resp.json::<Value>().await.unwrap()["outcome"],
            "alreadyInitialized"
        );
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_chat_filters_and_persists() {
        let model = Arc::new(ScriptedModel::new());
        model.push(reply("Hello! Do you have a website?"));
        let server = spawn_server(model.clone()).await;

        let resp = server
            .post(
                "/api/chat",
                json!({
                    "conversationId": "chat-9",
                    "messages": [{"id": "seed", "role": "user", "content": ""}]
                }),
            )
            .await;
        assert_eq!(resp.status().as_u16(), 200);

        // The stream ends once the turn is done
        let body = tokio::time::timeout(Duration::from_secs(5), resp.text())
            .await
            .unwrap()
            .unwrap();
        assert!(body.contains("event: message"), "{body}");
        assert!(body.contains("event: history"), "{body}");
        assert!(body.contains("Do you have a website?"), "{body}");

        assert!(model.requests()[0].messages.is_empty());
        let saved = server.store.load("chat-9").await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content, "Hello! Do you have a website?");
    }

    #[tokio::test]
    async fn test_stream_chat_without_id_is_not_persisted() {
        let model = Arc::new(ScriptedModel::new());
        model.push(reply("Hi"));
        let server = spawn_server(model).await;

        let resp = server
            .post(
                "/api/chat",
                json!({"messages": [{"id": "m1", "role": "user", "content": "hello"}]}),
            )
            .await;
        let body = resp.text().await.unwrap();
        assert!(body.contains("\"status\":\"idle\""), "{body}");
        assert_eq!(server.store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_is_not_found() {
        let server = spawn_server(Arc::new(ScriptedModel::new())).await;
        let (status, body) = server.get_json("/api/chats/bad.id").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Invalid conversation id"));
    }

    #[tokio::test]
    async fn test_dismiss_without_handoff() {
        let server = spawn_server(Arc::new(ScriptedModel::new())).await;
        let resp = server.post("/api/chats/chat-1/dismiss", json!({})).await;
        assert_eq!(resp.json::<Value>().await.unwrap(), json!({"handoff": null}));
    }
}
