//! Pure turn-status transitions
//!
//! `idle → submitted → streaming → idle`, with any failure routed through
//! `error` and back to `idle` once the error has been surfaced.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status of the conversation's turn slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Idle,
    Submitted,
    Streaming,
    Error,
}

impl TurnStatus {
    /// A turn owns the slot
    pub fn is_busy(self) -> bool {
        !matches!(self, TurnStatus::Idle)
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStatus::Idle => "idle",
            TurnStatus::Submitted => "submitted",
            TurnStatus::Streaming => "streaming",
            TurnStatus::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A new turn was accepted
    Submit,
    /// The first stream event arrived
    FirstEvent,
    /// The stream finished and history was reconciled
    Complete,
    Fail,
    /// The failure was published as a terminal message
    ErrorSurfaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A turn is already in flight ({0})")]
    Busy(TurnStatus),
    #[error("Invalid transition: {event:?} while {status}")]
    InvalidTransition { status: TurnStatus, event: StatusEvent },
}

pub fn transition(status: TurnStatus, event: StatusEvent) -> Result<TurnStatus, TransitionError> {
    match (status, event) {
        (TurnStatus::Idle, StatusEvent::Submit) => Ok(TurnStatus::Submitted),
        (busy, StatusEvent::Submit) => Err(TransitionError::Busy(busy)),

        (TurnStatus::Submitted, StatusEvent::FirstEvent) => Ok(TurnStatus::Streaming),

        // A stream may close without emitting anything
        (TurnStatus::Submitted | TurnStatus::Streaming, StatusEvent::Complete) => Ok(TurnStatus::Idle),
        (TurnStatus::Submitted | TurnStatus::Streaming, StatusEvent::Fail) => Ok(TurnStatus::Error),

        (TurnStatus::Error, StatusEvent::ErrorSurfaced) => Ok(TurnStatus::Idle),

        (status, event) => Err(TransitionError::InvalidTransition { status, event }),
    }
}

/// One-shot initialization of a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitPhase {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
}
