//! Reconciliation of a streamed model response into the message history
//!
//! One draft assistant message is built per turn. On completion the result
//! is the request prefix as sent followed by that message; the prefix is
//! authoritative, so nothing is ever diffed or merged against older state.

use crate::llm::ModelError;
use crate::message::{filter_blank, Message, ToolInvocation};
use serde_json::Value;
use thiserror::Error;

/// Incremental event from the model collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolCallResult {
        tool_call_id: String,
        result: Value,
    },
    Finish,
}

/// Tool events that cannot be applied. Discarded and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Tool result references unknown tool call {tool_call_id}")]
    UnknownToolCall { tool_call_id: String },
    #[error("Tool call {tool_call_id} already has a result")]
    DuplicateResult { tool_call_id: String },
    #[error("Tool call {tool_call_id} started twice")]
    DuplicateCall { tool_call_id: String },
    #[error("Event received after the stream finished")]
    AfterFinish,
}

/// What applying an event changed
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Text,
    ToolCall,
    /// The invocation as it stands after moving to `result`
    ToolResult(ToolInvocation),
    Finished,
}

/// Builds the assistant message for one in-flight turn
#[derive(Debug)]
pub struct StreamReconciler {
    draft: Message,
    finished: bool,
}

impl Default for StreamReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self {
            draft: Message::assistant(String::new()),
            finished: false,
        }
    }

    /// Current state of the draft (for live rendering)
    pub fn draft(&self) -> &Message {
        &self.draft
    }

    pub fn apply(&mut self, event: StreamEvent) -> Result<Applied, ReconcileError> {
        if self.finished {
            return Err(ReconcileError::AfterFinish);
        }

        match event {
            StreamEvent::TextDelta(delta) => {
                self.draft.content.push_str(&delta);
                Ok(Applied::Text)
            }
            StreamEvent::ToolCallStart {
                tool_call_id,
                tool_name,
                args,
            } => {
                if self.draft.tool_invocation(&tool_call_id).is_some() {
                    return Err(ReconcileError::DuplicateCall { tool_call_id });
                }
                self.draft
                    .tool_invocations
                    .push(ToolInvocation::call(tool_call_id, tool_name, args));
                Ok(Applied::ToolCall)
            }
            StreamEvent::ToolCallResult {
                tool_call_id,
                result,
            } => {
                let Some(invocation) = self
                    .draft
                    .tool_invocations
                    .iter_mut()
                    .find(|inv| inv.tool_call_id == tool_call_id)
                else {
                    return Err(ReconcileError::UnknownToolCall { tool_call_id });
                };
                if !invocation.resolve(result) {
                    return Err(ReconcileError::DuplicateResult { tool_call_id });
                }
                Ok(Applied::ToolResult(invocation.clone()))
            }
            StreamEvent::Finish => {
                self.finished = true;
                Ok(Applied::Finished)
            }
        }
    }

    /// Prefix as sent followed by the new assistant message.
    /// A draft with no text and no tool invocations adds nothing.
    pub fn finish(self, prefix: Vec<Message>) -> Vec<Message> {
        let mut history = filter_blank(prefix);
        if !self.draft.is_blank() {
            history.push(self.draft);
        }
        history
    }

    /// Discard the draft and close the turn with an error summary.
    pub fn fail(self, prefix: Vec<Message>, error: &ModelError) -> Vec<Message> {
        if !self.draft.tool_invocations.is_empty() {
            tracing::debug!(
                discarded = self.draft.tool_invocations.len(),
                "Dropping partial tool invocations from aborted turn"
            );
        }
        let mut history = filter_blank(prefix);
        history.push(Message::turn_error(&error.user_summary()));
        history
    }
}

#[cfg(test)]
mod proptests;
