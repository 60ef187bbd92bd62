//! Conversation session
//!
//! Owns the message history of one conversation, the single in-flight turn
//! slot and the one-shot initialization. Every turn streams through a
//! `StreamReconciler` and the reconciled history is written back to the
//! store when the turn ends.
//!
//! A `ConversationSession` is a cheap handle; clones share the same state.
//! The state lock is a std mutex and is never held across an await.

pub mod state;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub(crate) mod testing;

pub use state::{InitPhase, StatusEvent, TurnStatus};

use crate::llm::{ModelClient, ModelError, ModelRequest};
use crate::message::{conversational, filter_blank, Message, ToolInvocation};
use crate::monitor::{MonitorState, SurveyHandoff, ToolEventMonitor};
use crate::store::{ChatStore, StoreError};
use crate::stream::{Applied, StreamEvent, StreamReconciler};
use crate::tools::ToolRegistry;
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Message text must not be empty")]
    EmptyInput,
    #[error("A response is still streaming for this conversation")]
    Busy,
}

/// Model-facing settings shared by every session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    pub tools: Arc<ToolRegistry>,
    pub max_steps: u32,
    pub max_tokens: Option<u32>,
}

/// What `initialize` decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InitOutcome {
    /// History already existed, nothing sent
    Resumed,
    /// The goal was sent as the first user message
    SentGoal,
    /// An empty seed was sent so the assistant speaks first
    SentGreeting,
    /// A previous call already made the decision
    AlreadyInitialized,
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { messages: Vec<Message> },
    Failed { error: ModelError, messages: Vec<Message> },
}

impl TurnOutcome {
    pub fn messages(&self) -> &[Message] {
        match self {
            TurnOutcome::Completed { messages } | TurnOutcome::Failed { messages, .. } => messages,
        }
    }
}

/// Live update published to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionUpdate {
    /// Snapshot of the assistant message being streamed
    Message { message: Message },
    /// Finalized history after a turn
    History { messages: Vec<Message> },
    Status { status: TurnStatus },
    Handoff { handoff: Option<SurveyHandoff> },
    Error { message: String },
}

#[derive(Debug, Default)]
struct SessionState {
    /// Visible history (never contains blank messages)
    messages: Vec<Message>,
    status: TurnStatus,
    init: InitPhase,
    monitor: ToolEventMonitor,
}

struct SessionInner {
    id: String,
    store: Arc<dyn ChatStore>,
    model: Arc<dyn ModelClient>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<TurnStatus>,
    updates: broadcast::Sender<SessionUpdate>,
}

#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    /// Load prior history from the store and build the session.
    /// A conversation with no record starts empty.
    pub async fn open(
        id: impl Into<String>,
        store: Arc<dyn ChatStore>,
        model: Arc<dyn ModelClient>,
        options: SessionOptions,
    ) -> Result<Self, StoreError> {
        let id = id.into();
        let prior = store.load(&id).await?;
        tracing::debug!(conversation_id = %id, messages = prior.len(), "Opened conversation");
        Ok(Self::new(id, prior, store, model, options))
    }

    pub fn new(
        id: impl Into<String>,
        prior: Vec<Message>,
        store: Arc<dyn ChatStore>,
        model: Arc<dyn ModelClient>,
        options: SessionOptions,
    ) -> Self {
        let mut monitor = ToolEventMonitor::new();
        monitor.prime(&prior);

        let (status_tx, _) = watch::channel(TurnStatus::Idle);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = SessionState {
            messages: filter_blank(prior),
            monitor,
            ..SessionState::default()
        };

        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                store,
                model,
                options,
                state: Mutex::new(state),
                status_tx,
                updates,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn status(&self) -> TurnStatus {
        self.lock().status
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.lock().monitor.state().clone()
    }

    pub fn handoff(&self) -> Option<SurveyHandoff> {
        self.lock().monitor.state().handoff().cloned()
    }

    /// Clear a pending survey handoff. History is untouched.
    pub fn dismiss_handoff(&self) -> bool {
        let dismissed = self.lock().monitor.dismiss();
        if dismissed {
            tracing::info!(conversation_id = %self.inner.id, "Survey handoff dismissed");
            self.publish(SessionUpdate::Handoff { handoff: None });
        }
        dismissed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<TurnStatus> {
        self.inner.status_tx.subscribe()
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Decide the opening move and run it to completion.
    pub async fn initialize(&self, seed: Option<&str>) -> Result<InitOutcome, SessionError> {
        let (outcome, pending) = self.begin_initialize(seed)?;
        if let Some(pending) = pending {
            pending.run().await;
        }
        Ok(outcome)
    }

    /// Synchronous half of `initialize`. The decision is taken exactly once
    /// per session; the returned turn (if any) still has to be run.
    pub fn begin_initialize(
        &self,
        seed: Option<&str>,
    ) -> Result<(InitOutcome, Option<PendingTurn>), SessionError> {
        let mut state = self.lock();
        if state.init != InitPhase::Uninitialized {
            return Ok((InitOutcome::AlreadyInitialized, None));
        }
        if !state.messages.is_empty() {
            state.init = InitPhase::Initialized;
            return Ok((InitOutcome::Resumed, None));
        }

        let goal = seed.map(str::trim).filter(|s| !s.is_empty());
        let (first, outcome) = match goal {
            Some(goal) => (Message::user(goal), InitOutcome::SentGoal),
            None => (Message::seed(), InitOutcome::SentGreeting),
        };

        let prefix = vec![first];
        let mut pending = self.begin_locked(&mut state, prefix)?;
        pending.initializing = true;
        state.init = InitPhase::Initializing;
        drop(state);

        tracing::info!(conversation_id = %self.inner.id, outcome = ?outcome, "Initializing conversation");
        self.publish_after_submit();
        Ok((outcome, Some(pending)))
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Synchronous half of `submit_turn`: validate, take the turn slot and
    /// append the user message.
    pub fn begin_turn(&self, text: &str) -> Result<PendingTurn, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let mut state = self.lock();
        let mut prefix = state.messages.clone();
        prefix.push(Message::user(text));
        let pending = self.begin_locked(&mut state, prefix)?;
        drop(state);

        self.publish_after_submit();
        Ok(pending)
    }

    pub async fn submit_turn(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        let pending = self.begin_turn(text)?;
        Ok(pending.run().await)
    }

    /// Take a caller-supplied prefix (prior history plus the current turn) as
    /// authoritative instead of appending to the session's own history.
    pub fn begin_messages(&self, messages: Vec<Message>) -> Result<PendingTurn, SessionError> {
        let mut state = self.lock();
        let pending = self.begin_locked(&mut state, messages)?;
        let before = state.monitor.state().handoff().cloned();
        let SessionState {
            messages, monitor, ..
        } = &mut *state;
        monitor.rebase(messages);
        let after = monitor.state().handoff().cloned();
        drop(state);

        self.publish_after_submit();
        if before != after {
            self.publish(SessionUpdate::Handoff { handoff: after });
        }
        Ok(pending)
    }

    pub async fn submit_messages(&self, messages: Vec<Message>) -> Result<TurnOutcome, SessionError> {
        let pending = self.begin_messages(messages)?;
        Ok(pending.run().await)
    }

    fn begin_locked(
        &self,
        state: &mut SessionState,
        prefix: Vec<Message>,
    ) -> Result<PendingTurn, SessionError> {
        state.status = state::transition(state.status, StatusEvent::Submit)
            .map_err(|_| SessionError::Busy)?;
        state.messages = filter_blank(prefix.iter().cloned());
        self.inner.status_tx.send_replace(state.status);

        Ok(PendingTurn {
            session: self.clone(),
            prefix,
            initializing: false,
        })
    }

    fn publish_after_submit(&self) {
        let messages = self.messages();
        self.publish(SessionUpdate::Status {
            status: TurnStatus::Submitted,
        });
        self.publish(SessionUpdate::History { messages });
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.inner.updates.send(update);
    }

    /// Apply a status event and broadcast the new status
    fn advance(&self, event: StatusEvent) {
        let next = {
            let mut state = self.lock();
            match state::transition(state.status, event) {
                Ok(next) => {
                    state.status = next;
                    next
                }
                Err(e) => {
                    tracing::error!(conversation_id = %self.inner.id, error = %e, "Rejected status transition");
                    return;
                }
            }
        };
        self.inner.status_tx.send_replace(next);
        self.publish(SessionUpdate::Status { status: next });
    }

    /// Save the conversational part of `messages`
    async fn persist(&self, messages: &[Message]) {
        let record = conversational(messages.iter().cloned());
        if let Err(e) = self.inner.store.save(&self.inner.id, &record).await {
            tracing::error!(
                conversation_id = %self.inner.id,
                error = %e,
                "Failed to save conversation"
            );
        }
    }
}

/// A turn that holds the session's slot and still has to be streamed
#[must_use = "a pending turn keeps the session busy until it is run"]
pub struct PendingTurn {
    session: ConversationSession,
    prefix: Vec<Message>,
    initializing: bool,
}

impl std::fmt::Debug for PendingTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTurn")
            .field("conversation_id", &self.session.inner.id)
            .field("prefix_len", &self.prefix.len())
            .field("initializing", &self.initializing)
            .finish()
    }
}

impl PendingTurn {
    pub async fn run(self) -> TurnOutcome {
        let session = self.session;
        let inner = &session.inner;
        let request = ModelRequest {
            conversation_id: inner.id.clone(),
            system: inner.options.system_prompt.clone(),
            messages: conversational(self.prefix.iter().cloned()),
            tools: inner.options.tools.clone(),
            max_steps: inner.options.max_steps,
            max_tokens: inner.options.max_tokens,
        };

        let mut reconciler = StreamReconciler::new();
        let streamed = stream_turn(&session, request, &mut reconciler).await;

        let outcome = match streamed {
            Ok(resolved) => {
                let messages = reconciler.finish(self.prefix);
                let mut raised = None;
                {
                    let mut state = session.lock();
                    state.messages.clone_from(&messages);
                    for invocation in &resolved {
                        if let Some(handoff) = state.monitor.observe(invocation) {
                            raised = Some(handoff);
                        }
                    }
                }
                session.publish(SessionUpdate::History {
                    messages: messages.clone(),
                });
                if let Some(handoff) = raised {
                    session.publish(SessionUpdate::Handoff {
                        handoff: Some(handoff),
                    });
                }
                session.persist(&messages).await;
                session.advance(StatusEvent::Complete);
                TurnOutcome::Completed { messages }
            }
            Err(error) => {
                let messages = reconciler.fail(self.prefix, &error);
                session.lock().messages.clone_from(&messages);
                session.advance(StatusEvent::Fail);
                session.publish(SessionUpdate::Error {
                    message: error.user_summary(),
                });
                session.publish(SessionUpdate::History {
                    messages: messages.clone(),
                });
                session.persist(&messages).await;
                session.advance(StatusEvent::ErrorSurfaced);
                TurnOutcome::Failed { error, messages }
            }
        };

        if self.initializing {
            session.lock().init = InitPhase::Initialized;
        }
        outcome
    }
}

/// Drive the model stream into the reconciler until `Finish` or an error.
/// Returns the invocations resolved during the turn, in order; the monitor
/// only sees them once the turn completed.
async fn stream_turn(
    session: &ConversationSession,
    request: ModelRequest,
    reconciler: &mut StreamReconciler,
) -> Result<Vec<ToolInvocation>, ModelError> {
    let conversation_id = &session.inner.id;
    let mut stream = session.inner.model.stream(request).await?;
    let mut started = false;
    let mut resolved = Vec::new();

    while let Some(item) = stream.next().await {
        let event = item?;
        if !started {
            started = true;
            session.advance(StatusEvent::FirstEvent);
        }

        let finished = matches!(event, StreamEvent::Finish);
        match reconciler.apply(event) {
            Ok(Applied::Text | Applied::ToolCall) => {
                session.publish(SessionUpdate::Message {
                    message: reconciler.draft().clone(),
                });
            }
            Ok(Applied::ToolResult(invocation)) => {
                session.publish(SessionUpdate::Message {
                    message: reconciler.draft().clone(),
                });
                resolved.push(invocation);
            }
            Ok(Applied::Finished) => {}
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Discarding stream event");
            }
        }

        if finished {
            return Ok(resolved);
        }
    }

    Err(ModelError::protocol("Model stream ended without finishing"))
}
