//! Anthropic Messages API client with streaming and a server-side tool loop
//!
//! Each model step is one streamed request. Tool calls requested by a step
//! are executed locally and fed back as `tool_result` blocks until the model
//! stops asking for tools or the step limit is reached.

use super::{ModelClient, ModelError, ModelRequest, ModelStream};
use crate::message::{Message, Role};
use crate::stream::StreamEvent;
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const EVENT_BUFFER: usize = 64;

/// Sent in place of an empty history so the assistant opens the conversation.
const GREETING_PROMPT: &str = "Please start the conversation.";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    model: String,
    messages_url: String,
}

impl AnthropicClient {
    /// `base_url` points at an API root such as `https://api.anthropic.com/v1`
    pub fn new(api_key: String, model: String, base_url: Option<&str>) -> Self {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Self {
            http: Client::new(),
            api_key,
            model,
            messages_url: format!("{base}/messages"),
        }
    }

    async fn open_step(&self, body: &AnthropicRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let response = self
            .http
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ModelError::network(format!("Connection failed: {e}"))
                } else {
                    ModelError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }

    /// Stream one step, forwarding text and completed tool calls as they arrive.
    async fn read_step(
        response: reqwest::Response,
        tx: &mpsc::Sender<Result<StreamEvent, ModelError>>,
    ) -> Result<Option<StepOutcome>, ModelError> {
        let mut bytes = response.bytes_stream();
        let mut lines = SseLineBuffer::default();
        let mut step = StepAccumulator::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| ModelError::network(format!("Stream interrupted: {e}")))?;
            for line in lines.push(&chunk) {
                for event in step.handle_line(&line)? {
                    if tx.send(Ok(event)).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
        if let Some(line) = lines.finish() {
            for event in step.handle_line(&line)? {
                if tx.send(Ok(event)).await.is_err() {
                    return Ok(None);
                }
            }
        }

        step.into_outcome().map(Some)
    }

    async fn run_turn(
        self,
        request: ModelRequest,
        tx: mpsc::Sender<Result<StreamEvent, ModelError>>,
    ) -> Result<(), ModelError> {
        let mut messages = translate_history(&request.messages);
        let system = request.system.as_str();
        let tools: Vec<AnthropicTool> = request
            .tools
            .definitions()
            .into_iter()
            .map(|d| AnthropicTool {
                name: d.name,
                description: d.description,
                input_schema: d.input_schema,
            })
            .collect();
        let ctx = ToolContext::new(request.conversation_id.clone());
        let max_steps = request.max_steps.max(1);

        for step in 1..=max_steps {
            let body = AnthropicRequest {
                model: &self.model,
                max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                system,
                messages: &messages,
                tools: &tools,
                stream: true,
            };

            let response = self.open_step(&body).await?;
            let Some(outcome) = Self::read_step(response, &tx).await? else {
                tracing::debug!(conversation_id = %request.conversation_id, "Turn consumer went away");
                return Ok(());
            };

            tracing::debug!(
                conversation_id = %request.conversation_id,
                step,
                stop_reason = ?outcome.stop_reason,
                tool_uses = outcome.tool_uses.len(),
                "Model step finished"
            );

            if outcome.tool_uses.is_empty() {
                break;
            }

            let mut results = Vec::with_capacity(outcome.tool_uses.len());
            for tool_use in &outcome.tool_uses {
                let output = request
                    .tools
                    .execute(&tool_use.name, tool_use.input.clone(), ctx.clone())
                    .await
                    .unwrap_or_else(|| ToolOutput::error(format!("Unknown tool: {}", tool_use.name)));

                let event = StreamEvent::ToolCallResult {
                    tool_call_id: tool_use.id.clone(),
                    result: output.value.clone(),
                };
                if tx.send(Ok(event)).await.is_err() {
                    return Ok(());
                }
                results.push(AnthropicContentBlock::ToolResult {
                    tool_use_id: tool_use.id.clone(),
                    content: output.value.to_string(),
                    is_error: !output.success,
                });
            }

            push_blocks(&mut messages, "assistant", outcome.content);
            push_blocks(&mut messages, "user", results);

            if step == max_steps {
                tracing::info!(
                    conversation_id = %request.conversation_id,
                    max_steps,
                    "Step limit reached with pending tool results"
                );
            }
        }

        // Receiver may already be gone; nothing left to do either way
        let _ = tx.send(Ok(StreamEvent::Finish)).await;
        Ok(())
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run_turn(request, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// History translation
// ============================================================================

/// Convert the conversation into Anthropic messages.
///
/// Resolved tool invocations become a `tool_use` block on the assistant side
/// followed by a `tool_result` block on the user side. Unresolved invocations
/// are dropped. Consecutive same-role messages are merged.
fn translate_history(history: &[Message]) -> Vec<AnthropicMessage> {
    let mut messages = Vec::new();

    for msg in history.iter().filter(|m| !m.is_blank()) {
        match msg.role {
            Role::User | Role::System => {
                push_blocks(&mut messages, "user", text_block(&msg.content));
            }
            Role::Assistant => {
                let mut blocks = text_block(&msg.content);
                let mut results = Vec::new();
                for inv in &msg.tool_invocations {
                    let Some(result) = inv.result() else {
                        continue;
                    };
                    blocks.push(AnthropicContentBlock::ToolUse {
                        id: inv.tool_call_id.clone(),
                        name: inv.tool_name.clone(),
                        input: inv.args.clone(),
                    });
                    results.push(AnthropicContentBlock::ToolResult {
                        tool_use_id: inv.tool_call_id.clone(),
                        content: result.to_string(),
                        is_error: false,
                    });
                }
                push_blocks(&mut messages, "assistant", blocks);
                push_blocks(&mut messages, "user", results);
            }
        }
    }

    if messages.first().is_none_or(|m| m.role != "user") {
        messages.insert(
            0,
            AnthropicMessage {
                role: "user",
                content: text_block(GREETING_PROMPT),
            },
        );
    }

    messages
}

fn text_block(text: &str) -> Vec<AnthropicContentBlock> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![AnthropicContentBlock::Text {
            text: text.to_string(),
        }]
    }
}

fn push_blocks(
    messages: &mut Vec<AnthropicMessage>,
    role: &'static str,
    blocks: Vec<AnthropicContentBlock>,
) {
    if blocks.is_empty() {
        return;
    }
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.extend(blocks),
        _ => messages.push(AnthropicMessage {
            role,
            content: blocks,
        }),
    }
}

// ============================================================================
// Stream decoding
// ============================================================================

/// Splits a byte stream into trimmed lines. Bytes are buffered until a full
/// line is available so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        Some(line)
    }
}

#[derive(Debug)]
struct ToolUse {
    id: String,
    name: String,
    input: Value,
}

#[derive(Debug)]
struct StepOutcome {
    /// Assistant content to replay in the next step
    content: Vec<AnthropicContentBlock>,
    tool_uses: Vec<ToolUse>,
    stop_reason: Option<String>,
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
        input: Option<Value>,
    },
}

/// Assembles one step's content blocks from stream payloads
#[derive(Debug, Default)]
struct StepAccumulator {
    blocks: BTreeMap<usize, PartialBlock>,
    stop_reason: Option<String>,
    stopped: bool,
}

impl StepAccumulator {
    fn handle_line(&mut self, line: &str) -> Result<Vec<StreamEvent>, ModelError> {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return Ok(Vec::new());
        };
        if data.is_empty() || data == "[DONE]" {
            return Ok(Vec::new());
        }
        let payload: StreamPayload = serde_json::from_str(data)
            .map_err(|e| ModelError::protocol(format!("Malformed stream event: {e}")))?;
        self.handle(payload)
    }

    fn handle(&mut self, payload: StreamPayload) -> Result<Vec<StreamEvent>, ModelError> {
        let mut events = Vec::new();
        match payload {
            StreamPayload::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StartBlock::Text { text } => {
                    if !text.is_empty() {
                        events.push(StreamEvent::TextDelta(text.clone()));
                    }
                    self.blocks.insert(index, PartialBlock::Text(text));
                }
                StartBlock::ToolUse { id, name } => {
                    self.blocks.insert(
                        index,
                        PartialBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                            input: None,
                        },
                    );
                }
                StartBlock::Other => {}
            },
            StreamPayload::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(&index), delta) {
                    (Some(PartialBlock::Text(text)), BlockDelta::TextDelta { text: delta }) => {
                        text.push_str(&delta);
                        events.push(StreamEvent::TextDelta(delta));
                    }
                    (
                        Some(PartialBlock::ToolUse { json, .. }),
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => json.push_str(&partial_json),
                    _ => {}
                }
            }
            StreamPayload::ContentBlockStop { index } => {
                if let Some(PartialBlock::ToolUse {
                    id,
                    name,
                    json,
                    input,
                }) = self.blocks.get_mut(&index)
                {
                    let args = if json.trim().is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(json).map_err(|e| {
                            ModelError::protocol(format!("Malformed tool input for {name}: {e}"))
                        })?
                    };
                    *input = Some(args.clone());
                    events.push(StreamEvent::ToolCallStart {
                        tool_call_id: id.clone(),
                        tool_name: name.clone(),
                        args,
                    });
                }
            }
            StreamPayload::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
            }
            StreamPayload::MessageStop => self.stopped = true,
            StreamPayload::Error { error } => return Err(error.into_model_error()),
            StreamPayload::MessageStart | StreamPayload::Ping | StreamPayload::Other => {}
        }
        Ok(events)
    }

    fn into_outcome(self) -> Result<StepOutcome, ModelError> {
        if !self.stopped {
            return Err(ModelError::network("Stream ended before message_stop"));
        }

        let mut content = Vec::new();
        let mut tool_uses = Vec::new();
        for block in self.blocks.into_values() {
            match block {
                PartialBlock::Text(text) => content.extend(text_block(&text)),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input: Some(input),
                    ..
                } => {
                    content.push(AnthropicContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    tool_uses.push(ToolUse { id, name, input });
                }
                PartialBlock::ToolUse { id, .. } => {
                    tracing::warn!(tool_call_id = %id, "Dropping tool call that never completed");
                }
            }
        }

        Ok(StepOutcome {
            content,
            tool_uses,
            stop_reason: self.stop_reason,
        })
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [AnthropicMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [AnthropicTool],
    stream: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes fields by reference
fn no_tools(tools: &&[AnthropicTool]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl ApiErrorBody {
    fn into_model_error(self) -> ModelError {
        match self.kind.as_str() {
            "overloaded_error" | "api_error" => ModelError::server_error(self.message),
            "rate_limit_error" => ModelError::rate_limit(self.message),
            "authentication_error" | "permission_error" => ModelError::auth(self.message),
            "invalid_request_error" => ModelError::invalid_request(self.message),
            _ => ModelError::unknown(self.message),
        }
    }
}
