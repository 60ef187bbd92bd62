//! Conversation message types
//!
//! The serialized shape matches what the chat UI sends and what is persisted
//! per conversation: camelCase field names, lowercase roles, and tool
//! invocations tagged by `state`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle of a tool invocation. `result` only exists once the call resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InvocationState {
    Call,
    Result { result: Value },
}

/// A tool invocation embedded in an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(flatten)]
    pub state: InvocationState,
}

impl ToolInvocation {
    pub fn call(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: InvocationState::Call,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, InvocationState::Result { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.state {
            InvocationState::Call => None,
            InvocationState::Result { result } => Some(result),
        }
    }

    /// Move `call` to `result`. Returns false (and changes nothing) if already resolved.
    pub fn resolve(&mut self, result: Value) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.state = InvocationState::Result { result };
        true
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    /// Rendered notice for a failed turn. Never persisted nor sent to the model.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            tool_invocations: Vec::new(),
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty user message that only exists to make the assistant speak first.
    /// It is filtered out before the model call and never persisted.
    pub fn seed() -> Self {
        Self::new(Role::User, String::new())
    }

    /// Terminal notice shown in place of the reply of a failed turn
    pub fn turn_error(summary: &str) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(format!("Error: {summary}"))
        }
    }

    /// Blank messages are never forwarded to the model nor rendered.
    /// A tool-only assistant message is not blank.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.tool_invocations.is_empty()
    }

    pub fn tool_invocation(&self, tool_call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations
            .iter()
            .find(|inv| inv.tool_call_id == tool_call_id)
    }
}

/// Drop every blank message, keeping order.
pub fn filter_blank(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    messages.into_iter().filter(|m| !m.is_blank()).collect()
}

/// The part of a history that is conversation proper: no blank messages
/// and no failed-turn notices. This is what the model sees and what is saved.
pub fn conversational(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| !m.is_blank() && !m.is_error)
        .collect()
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
