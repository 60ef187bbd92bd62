//! Durable per-conversation message storage
//!
//! A conversation has no physical footprint until its first `save`.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::InMemoryStore;

use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

const MAX_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize conversation {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid conversation id: {0:?}")]
    InvalidId(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed persistence of a conversation's message sequence
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Return `id` or a freshly generated one. Writes nothing.
    async fn create(&self, id: Option<String>) -> StoreResult<String>;

    /// Persisted sequence, or empty when there is no record.
    async fn load(&self, id: &str) -> StoreResult<Vec<Message>>;

    /// Replace the whole record for `id` (last writer wins).
    async fn save(&self, id: &str, messages: &[Message]) -> StoreResult<()>;

    /// True iff a durable record is present.
    async fn exists(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
impl<T: ChatStore + ?Sized> ChatStore for Arc<T> {
    async fn create(&self, id: Option<String>) -> StoreResult<String> {
        (**self).create(id).await
    }

    async fn load(&self, id: &str) -> StoreResult<Vec<Message>> {
        (**self).load(id).await
    }

    async fn save(&self, id: &str, messages: &[Message]) -> StoreResult<()> {
        (**self).save(id, messages).await
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        (**self).exists(id).await
    }
}

/// Ids end up in file names, so only a conservative alphabet is accepted.
pub fn validate_id(id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Shared `create` semantics for every store
fn resolve_id(id: Option<String>) -> StoreResult<String> {
    let id = id.unwrap_or_else(crate::message::generate_id);
    validate_id(&id)?;
    Ok(id)
}
