//! Property-based tests for turn-status transitions

use super::state::*;
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = TurnStatus> {
    prop_oneof![
        Just(TurnStatus::Idle),
        Just(TurnStatus::Submitted),
        Just(TurnStatus::Streaming),
        Just(TurnStatus::Error),
    ]
}

fn arb_event() -> impl Strategy<Value = StatusEvent> {
    prop_oneof![
        Just(StatusEvent::Submit),
        Just(StatusEvent::FirstEvent),
        Just(StatusEvent::Complete),
        Just(StatusEvent::Fail),
        Just(StatusEvent::ErrorSurfaced),
    ]
}

/// How a simulated turn ends
#[derive(Debug, Clone, Copy)]
enum Ending {
    Silent,
    Streamed,
    StreamedThenFailed,
    FailedUpfront,
}

fn arb_ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        Just(Ending::Silent),
        Just(Ending::Streamed),
        Just(Ending::StreamedThenFailed),
        Just(Ending::FailedUpfront),
    ]
}

fn events_for(ending: Ending) -> Vec<StatusEvent> {
    use StatusEvent::*;
    match ending {
        Ending::Silent => vec![Submit, Complete],
        Ending::Streamed => vec![Submit, FirstEvent, Complete],
        Ending::StreamedThenFailed => vec![Submit, FirstEvent, Fail, ErrorSurfaced],
        Ending::FailedUpfront => vec![Submit, Fail, ErrorSurfaced],
    }
}

proptest! {
    #[test]
    fn prop_submit_only_accepted_when_idle(status in arb_status()) {
        let result = transition(status, StatusEvent::Submit);
        prop_assert_eq!(result.is_ok(), status == TurnStatus::Idle);
    }

    #[test]
    fn prop_error_only_left_via_surfacing(event in arb_event()) {
        match transition(TurnStatus::Error, event) {
            Ok(next) => {
                prop_assert_eq!(event, StatusEvent::ErrorSurfaced);
                prop_assert_eq!(next, TurnStatus::Idle);
            }
            Err(_) => prop_assert_ne!(event, StatusEvent::ErrorSurfaced),
        }
    }

    #[test]
    fn prop_rejected_events_leave_no_trace(
        events in proptest::collection::vec(arb_event(), 0..50)
    ) {
        // Rejected transitions are errors, so the caller keeps its status;
        // the status therefore only ever moves along accepted edges
        let mut status = TurnStatus::Idle;
        for event in events {
            if let Ok(next) = transition(status, event) {
                if next == TurnStatus::Streaming {
                    prop_assert_eq!(status, TurnStatus::Submitted);
                }
                if status == TurnStatus::Idle {
                    prop_assert_eq!(next, TurnStatus::Submitted);
                }
                status = next;
            }
        }
    }

    #[test]
    fn prop_every_turn_ends_idle(endings in proptest::collection::vec(arb_ending(), 1..20)) {
        let mut status = TurnStatus::Idle;
        for ending in endings {
            for event in events_for(ending) {
                status = transition(status, event).map_err(|e| TestCaseError::fail(e.to_string()))?;
                if event != StatusEvent::Complete && event != StatusEvent::ErrorSurfaced {
                    prop_assert!(status.is_busy());
                }
            }
            prop_assert_eq!(status, TurnStatus::Idle);
        }
    }
}
