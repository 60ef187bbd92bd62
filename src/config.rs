//! Environment-driven configuration

use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_DATA_DIR: &str = "./.chats";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_MAX_STEPS: u32 = 5;
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Directory holding one `<id>.json` file per conversation
    pub data_dir: PathBuf,
    pub port: u16,
    pub anthropic_api_key: Option<String>,
    /// API root override, e.g. a proxy or gateway
    pub anthropic_base_url: Option<String>,
    pub model: String,
    pub max_steps: u32,
    pub max_tokens: u32,
    /// Web search tools are only registered when set
    pub tavily_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            data_dir: var("SURVEY_CHAT_DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
            port: parse_or(var("SURVEY_CHAT_PORT"), "SURVEY_CHAT_PORT", DEFAULT_PORT),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_base_url: var("ANTHROPIC_BASE_URL"),
            model: var("SURVEY_CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_steps: parse_or(var("SURVEY_CHAT_MAX_STEPS"), "SURVEY_CHAT_MAX_STEPS", DEFAULT_MAX_STEPS).max(1),
            max_tokens: parse_or(var("SURVEY_CHAT_MAX_TOKENS"), "SURVEY_CHAT_MAX_TOKENS", DEFAULT_MAX_TOKENS),
            tavily_api_key: var("TAVILY_API_KEY"),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Ignoring unparseable setting");
            default
        }),
    }
}
