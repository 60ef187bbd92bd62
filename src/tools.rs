//! Server-side tools the assistant may call during a turn
//!
//! Tools are stateless singletons; per-call context comes in through `ToolContext`.

mod search;
mod survey_trigger;

pub use search::{TavilyClient, TavilyExtractTool, TavilySearchTool};
pub use survey_trigger::SurveyTriggerTool;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::llm::ToolDefinition;

/// Result of a tool execution. `value` becomes the invocation's `result`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub value: Value,
}

impl ToolOutput {
    pub fn success(value: Value) -> Self {
        Self {
            success: true,
            value,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            value: json!({ "error": message.into() }),
        }
    }
}

/// Per-call context
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as advertised to the model
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Tools available to conversations
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with no tools at all
    #[cfg(test)]
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// The survey trigger, plus web search and extraction when Tavily is configured
    pub fn standard(tavily: Option<TavilyClient>) -> Self {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        if let Some(client) = tavily {
            let client = Arc::new(client);
            tools.push(Arc::new(TavilySearchTool::new(client.clone())));
            tools.push(Arc::new(TavilyExtractTool::new(client)));
        } else {
            tracing::warn!("TAVILY_API_KEY not set, web search tools disabled");
        }
        tools.push(Arc::new(SurveyTriggerTool));
        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Execute a tool by name. `None` if no such tool is registered.
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        let tool = self.tools.iter().find(|t| t.name() == name)?;
        Some(tool.run(input, ctx).await)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
