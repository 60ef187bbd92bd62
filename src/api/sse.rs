//! Server-Sent Events support

use crate::message::Message;
use crate::monitor::SurveyHandoff;
use crate::session::{SessionUpdate, TurnStatus};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// First event on a conversation stream
#[derive(Debug, Serialize)]
pub struct InitSnapshot {
    pub messages: Vec<Message>,
    pub status: TurnStatus,
    pub handoff: Option<SurveyHandoff>,
}

/// Snapshot followed by every live update
pub fn conversation_stream(
    init: InitSnapshot,
    updates: broadcast::Receiver<SessionUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = stream::once(future::ready(Ok(init_event(&init))));
    let live = updates_stream(updates).map(|update| Ok(update_event(&update)));

    Sse::new(init.chain(live)).keep_alive(keep_alive())
}

/// Updates of a single turn, ending once the session is idle again
pub fn turn_stream(
    updates: broadcast::Receiver<SessionUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let live = Box::pin(updates_stream(updates));
    let events = stream::unfold((live, false), |(mut live, done)| async move {
        if done {
            return None;
        }
        let update = live.next().await?;
        let last = matches!(update, SessionUpdate::Status { status: TurnStatus::Idle });
        Some((Ok(update_event(&update)), (live, last)))
    });

    Sse::new(events).keep_alive(keep_alive())
}

fn updates_stream(
    updates: broadcast::Receiver<SessionUpdate>,
) -> impl Stream<Item = SessionUpdate> {
    BroadcastStream::new(updates).filter_map(|result| {
        future::ready(match result {
            Ok(update) => Some(update),
            Err(e) => {
                // Lagged receivers skip ahead; later snapshots are complete
                tracing::debug!(error = %e, "SSE subscriber lagged");
                None
            }
        })
    })
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}

fn init_event(init: &InitSnapshot) -> Event {
    let mut data = serde_json::to_value(init).unwrap_or_else(|_| json!({}));
    data["type"] = json!("init");
    Event::default().event("init").data(data.to_string())
}

fn update_event(update: &SessionUpdate) -> Event {
    let name = match update {
        SessionUpdate::Message { .. } => "message",
        SessionUpdate::History { .. } => "history",
        SessionUpdate::Status { .. } => "status",
        SessionUpdate::Handoff { .. } => "handoff",
        SessionUpdate::Error { .. } => "error",
    };
    let data = serde_json::to_string(update).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize session update");
        json!({ "type": "error", "message": "serialization failed" }).to_string()
    });
    Event::default().event(name).data(data)
}
