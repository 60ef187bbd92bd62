//! Mock collaborators for session tests
//!
//! These let the session core run without a network or a filesystem.

use super::SessionOptions;
use crate::llm::{ModelClient, ModelError, ModelRequest, ModelStream};
use crate::message::Message;
use crate::store::{ChatStore, StoreError, StoreResult};
use crate::stream::StreamEvent;
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;

pub fn test_options() -> SessionOptions {
    SessionOptions {
        system_prompt: "You are a survey requirements analyst.".to_string(),
        tools: Arc::new(ToolRegistry::empty()),
        max_steps: 5,
        max_tokens: None,
    }
}

enum Script {
    Events(Vec<Result<StreamEvent, ModelError>>),
    /// Emit `head`, wait for the release signal, then emit `tail`
    Gated {
        head: Vec<Result<StreamEvent, ModelError>>,
        release: Arc<Notify>,
        tail: Vec<Result<StreamEvent, ModelError>>,
    },
    Fail(ModelError),
}

/// Model client that plays back queued scripts, one per turn
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
}

#[allow(dead_code)]
impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, events: Vec<Result<StreamEvent, ModelError>>) {
        self.scripts.lock().unwrap().push_back(Script::Events(events));
    }

    /// Queue a turn that stalls after `head` until the returned signal fires
    pub fn push_gated(
        &self,
        head: Vec<Result<StreamEvent, ModelError>>,
        tail: Vec<Result<StreamEvent, ModelError>>,
    ) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.scripts.lock().unwrap().push_back(Script::Gated {
            head,
            release: release.clone(),
            tail,
        });
        release
    }

    /// Queue a turn that fails before streaming
    pub fn push_error(&self, error: ModelError) {
        self.scripts.lock().unwrap().push_back(Script::Fail(error));
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Fail(ModelError::unknown("No scripted response")));

        match script {
            Script::Events(events) => Ok(futures::stream::iter(events).boxed()),
            Script::Gated {
                head,
                release,
                tail,
            } => {
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(async move {
                    for event in head {
                        let _ = tx.send(event).await;
                    }
                    release.notified().await;
                    for event in tail {
                        let _ = tx.send(event).await;
                    }
                });
                Ok(ReceiverStream::new(rx).boxed())
            }
            Script::Fail(error) => Err(error),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Store whose writes always fail; reads come back empty
pub struct FailingStore;

#[async_trait]
impl ChatStore for FailingStore {
    async fn create(&self, id: Option<String>) -> StoreResult<String> {
        Ok(id.unwrap_or_else(crate::message::generate_id))
    }

    async fn load(&self, _id: &str) -> StoreResult<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn save(&self, _id: &str, _messages: &[Message]) -> StoreResult<()> {
        Err(StoreError::Io(io::Error::other("disk full")))
    }

    async fn exists(&self, _id: &str) -> StoreResult<bool> {
        Ok(false)
    }
}
