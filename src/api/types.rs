//! API request and response types

use crate::message::Message;
use crate::monitor::SurveyHandoff;
use crate::session::{InitOutcome, TurnStatus};
use serde::{Deserialize, Serialize};

/// Streaming chat request as sent by the chat UI.
/// `messages` is the full prior history plus the current turn.
#[derive(Debug, Deserialize)]
pub struct StreamChatRequest {
    #[serde(default, alias = "conversationId")]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Request to create a new conversation
#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub id: String,
}

/// Conversation snapshot for page loads
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    /// Whether a durable record exists yet
    pub exists: bool,
    pub messages: Vec<Message>,
    pub status: TurnStatus,
    pub handoff: Option<SurveyHandoff>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub outcome: InitOutcome,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

#[derive(Debug, Serialize)]
pub struct DismissResponse {
    pub handoff: Option<SurveyHandoff>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
