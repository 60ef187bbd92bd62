//! One pretty-printed JSON array per conversation, published atomically

use super::{resolve_id, validate_id, ChatStore, StoreError, StoreResult};
use crate::message::Message;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// File-backed store: `<dir>/<id>.json`
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Ensure the storage directory exists
    pub async fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn chat_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Unique per write so overlapping saves never share a temp file
    fn temp_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{id}.{}.json.tmp", uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl ChatStore for JsonFileStore {
    async fn create(&self, id: Option<String>) -> StoreResult<String> {
        let id = resolve_id(id)?;
        tracing::debug!(conv_id = %id, "Created conversation id (no record written)");
        Ok(id)
    }

    async fn load(&self, id: &str) -> StoreResult<Vec<Message>> {
        validate_id(id)?;
        let path = self.chat_path(id);

        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(conv_id = %id, "No chat record, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Serialization {
            id: id.to_string(),
            source,
        })
    }

    async fn save(&self, id: &str, messages: &[Message]) -> StoreResult<()> {
        validate_id(id)?;
        self.init().await?;

        let json =
            serde_json::to_string_pretty(messages).map_err(|source| StoreError::Serialization {
                id: id.to_string(),
                source,
            })?;

        // Write to temp, fsync, then rename over the live record
        let temp_path = self.temp_path(id);
        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, self.chat_path(id)).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(conv_id = %id, count = messages.len(), "Saved chat");
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        validate_id(id)?;
        Ok(fs::try_exists(self.chat_path(id)).await?)
    }
}
