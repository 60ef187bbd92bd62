//! In-memory store for tests and ephemeral runs

use super::{resolve_id, validate_id, ChatStore, StoreResult};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStore {
    chats: Mutex<HashMap<String, Vec<Message>>>,
    save_count: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    #[cfg(test)]
    pub fn save_count(&self) -> usize {
        *self.save_count.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn create(&self, id: Option<String>) -> StoreResult<String> {
        resolve_id(id)
    }

    async fn load(&self, id: &str) -> StoreResult<Vec<Message>> {
        validate_id(id)?;
        let chats = self.chats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(chats.get(id).cloned().unwrap_or_default())
    }

    async fn save(&self, id: &str, messages: &[Message]) -> StoreResult<()> {
        validate_id(id)?;
        self.chats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.to_string(), messages.to_vec());
        *self.save_count.lock().unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        validate_id(id)?;
        let chats = self.chats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(chats.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStore::new();
        let id = store.create(Some("c1".into())).await.unwrap();

        assert!(!store.exists(&id).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_empty());

        let history = vec![Message::user("hello")];
        store.save(&id, &history).await.unwrap();

        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.load(&id).await.unwrap(), history);
        assert_eq!(store.save_count(), 1);
    }
}
