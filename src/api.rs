//! HTTP API for the survey chat

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::registry::SessionRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}
