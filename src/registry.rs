//! One live session per conversation id
//!
//! HTTP handlers never build sessions themselves; they go through the
//! registry so every request for an id shares the same turn slot.

use crate::llm::ModelClient;
use crate::message::generate_id;
use crate::session::{ConversationSession, SessionOptions};
use crate::store::{ChatStore, InMemoryStore, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct SessionRegistry {
    store: Arc<dyn ChatStore>,
    model: Arc<dyn ModelClient>,
    options: SessionOptions,
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ChatStore>, model: Arc<dyn ModelClient>, options: SessionOptions) -> Self {
        Self {
            store,
            model,
            options,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Session for `id`, loading prior history on first use
    pub async fn get_or_open(&self, id: &str) -> Result<ConversationSession, StoreError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                return Ok(session.clone());
            }
        }

        let session = ConversationSession::open(
            id,
            self.store.clone(),
            self.model.clone(),
            self.options.clone(),
        )
        .await?;

        // Another request may have opened it while we were loading
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.to_string()).or_insert(session).clone();
        tracing::debug!(conversation_id = %id, live_sessions = sessions.len(), "Session ready");
        Ok(session)
    }

    /// Session that is neither shared nor persisted, for requests without an id
    pub fn ephemeral(&self) -> ConversationSession {
        ConversationSession::new(
            generate_id(),
            Vec::new(),
            Arc::new(InMemoryStore::new()),
            self.model.clone(),
            self.options.clone(),
        )
    }

    /// Allocate an id for a new conversation. No record is written.
    pub async fn create(&self, id: Option<String>) -> StoreResult<String> {
        self.store.create(id).await
    }

    #[cfg(test)]
    pub async fn live_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
