//! Model collaborator abstraction
//!
//! A model call produces a stream of `StreamEvent`s for one turn, including
//! the results of any server-side tools executed between model steps.

mod anthropic;
mod error;
mod types;

pub use anthropic::AnthropicClient;
pub use error::ModelError;
pub use types::*;

use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Events for one turn. Ends after `Finish` or the first error.
pub type ModelStream = BoxStream<'static, Result<StreamEvent, ModelError>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a turn. Errors before the first byte are returned directly.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;

    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for model clients
pub struct LoggingClient {
    inner: Arc<dyn ModelClient>,
    model_id: String,
}

impl LoggingClient {
    pub fn new(inner: Arc<dyn ModelClient>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ModelClient for LoggingClient {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let start = Instant::now();
        let conversation_id = request.conversation_id.clone();
        let message_count = request.messages.len();

        let stream = match self.inner.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    conversation_id = %conversation_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Model request failed"
                );
                return Err(e);
            }
        };

        tracing::debug!(
            model = %self.model_id,
            conversation_id = %conversation_id,
            messages = message_count,
            "Model stream opened"
        );

        let model_id = self.model_id.clone();
        let mut tool_calls = 0usize;
        Ok(stream
            .inspect(move |item| match item {
                Ok(StreamEvent::ToolCallStart { tool_name, .. }) => {
                    tool_calls += 1;
                    tracing::debug!(model = %model_id, tool = %tool_name, "Tool call requested");
                }
                Ok(StreamEvent::Finish) => {
                    tracing::info!(
                        model = %model_id,
                        conversation_id = %conversation_id,
                        duration_ms = %start.elapsed().as_millis(),
                        tool_calls,
                        "Model turn completed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        model = %model_id,
                        conversation_id = %conversation_id,
                        duration_ms = %start.elapsed().as_millis(),
                        error = %e.message,
                        retryable = e.kind.is_retryable(),
                        "Model stream failed"
                    );
                }
                Ok(_) => {}
            })
            .boxed())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
