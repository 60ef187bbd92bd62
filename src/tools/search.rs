//! Web search and page extraction via the Tavily REST API

use super::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESULTS_CAP: u32 = 20;

/// Shared HTTP client for both Tavily tools
#[derive(Debug, Clone)]
pub struct TavilyClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl TavilyClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, String> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Request to Tavily failed: {e}"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read Tavily response: {e}"))?;

        if !status.is_success() {
            return Err(format!("Tavily returned HTTP {}: {text}", status.as_u16()));
        }

        serde_json::from_str(&text).map_err(|e| format!("Invalid Tavily response: {e}"))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchInput {
    query: String,
    #[serde(default)]
    search_depth: SearchDepth,
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: SearchDepth,
    max_results: u32,
}

pub struct TavilySearchTool {
    client: Arc<TavilyClient>,
}

impl TavilySearchTool {
    pub fn new(client: Arc<TavilyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &'static str {
        "tavilySearch"
    }

    fn description(&self) -> String {
        "Search the web for up-to-date information about a company, product, or topic. Use as a fallback when extracting a specific URL does not give enough information.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "searchDepth": {
                    "type": "string",
                    "enum": ["basic", "advanced"],
                    "description": "How thorough the search should be"
                },
                "maxResults": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_RESULTS_CAP,
                    "description": "Maximum number of results to return (default 5)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: SearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let query = input.query.trim();
        if query.is_empty() {
            return ToolOutput::error("Query must not be empty");
        }

        let request = SearchRequest {
            query,
            search_depth: input.search_depth,
            max_results: input.max_results.unwrap_or(5).clamp(1, MAX_RESULTS_CAP),
        };

        tracing::debug!(conversation_id = %ctx.conversation_id, query, "Tavily search");
        match self.client.post("search", &request).await {
            Ok(value) => ToolOutput::success(value),
            Err(e) => {
                tracing::warn!(conversation_id = %ctx.conversation_id, error = %e, "Tavily search failed");
                ToolOutput::error(e)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractInput {
    urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    urls: &'a [String],
}

pub struct TavilyExtractTool {
    client: Arc<TavilyClient>,
}

impl TavilyExtractTool {
    pub fn new(client: Arc<TavilyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for TavilyExtractTool {
    fn name(&self) -> &'static str {
        "tavilyExtract"
    }

    fn description(&self) -> String {
        "Extract the readable content of one or more web pages. Prefer this over search when the user gives a website URL or domain.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["urls"],
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URLs to extract content from"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: ExtractInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        if input.urls.is_empty() {
            return ToolOutput::error("At least one URL is required");
        }

        tracing::debug!(conversation_id = %ctx.conversation_id, urls = ?input.urls, "Tavily extract");
        match self.client.post("extract", &ExtractRequest { urls: &input.urls }).await {
            Ok(value) => ToolOutput::success(value),
            Err(e) => {
                tracing::warn!(conversation_id = %ctx.conversation_id, error = %e, "Tavily extract failed");
                ToolOutput::error(e)
            }
        }
    }
}
