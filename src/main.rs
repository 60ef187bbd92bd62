//! Survey chat - conversational survey-requirements assistant
//!
//! Streams a model-driven interview over HTTP, persists each conversation
//! as JSON, and hands off to survey generation once requirements are set.

mod api;
mod config;
mod llm;
mod message;
mod monitor;
mod registry;
mod session;
mod store;
mod stream;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use llm::{AnthropicClient, LoggingClient};
use registry::SessionRegistry;
use session::SessionOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use store::JsonFileStore;
use tools::{TavilyClient, ToolRegistry};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    tracing::info!(path = %config.data_dir.display(), "Opening conversation store");
    let store = JsonFileStore::new(&config.data_dir);
    store.init().await?;

    let tools = Arc::new(ToolRegistry::standard(
        config.tavily_api_key.clone().map(TavilyClient::new),
    ));
    tracing::info!(tools = ?tools.names(), "Tools registered");

    let api_key = config.anthropic_api_key.clone().unwrap_or_else(|| {
        tracing::warn!("ANTHROPIC_API_KEY is not set; model calls will fail");
        String::new()
    });
    let model = LoggingClient::new(Arc::new(AnthropicClient::new(
        api_key,
        config.model.clone(),
        config.anthropic_base_url.as_deref(),
    )));
    tracing::info!(model = %config.model, max_steps = config.max_steps, "Model client ready");

    let options = SessionOptions {
        system_prompt: system_prompt::build_system_prompt(&tools),
        tools,
        max_steps: config.max_steps,
        max_tokens: Some(config.max_tokens),
    };
    let state = AppState::new(SessionRegistry::new(
        Arc::new(store),
        Arc::new(model),
        options,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Survey chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
