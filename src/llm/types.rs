//! Common types for model requests

use crate::message::Message;
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Request to the model collaborator
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub conversation_id: String,
    /// Fixed instruction text
    pub system: String,
    /// Ordered, non-blank conversation prefix
    pub messages: Vec<Message>,
    /// Tools advertised to the model and executed between steps
    pub tools: Arc<ToolRegistry>,
    /// Upper bound on model calls within one turn (tool round trips)
    pub max_steps: u32,
    pub max_tokens: Option<u32>,
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
