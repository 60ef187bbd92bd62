//! Property-based tests for the stream reconciler
//!
//! Whatever order tool events arrive in, an invocation resolves at most once
//! and the request prefix is kept verbatim.

use super::*;
use crate::message::Message;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

fn arb_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".to_string()), Just("b".to_string()), Just("c".to_string())]
}

fn arb_event() -> impl Strategy<Value = StreamEvent> {
    prop_oneof![
        "[a-z ]{0,8}".prop_map(StreamEvent::TextDelta),
        arb_id().prop_map(|id| StreamEvent::ToolCallStart {
            tool_call_id: id,
            tool_name: "tavilySearch".to_string(),
            args: json!({}),
        }),
        (arb_id(), 0u32..100).prop_map(|(id, n)| StreamEvent::ToolCallResult {
            tool_call_id: id,
            result: json!({ "n": n }),
        }),
    ]
}

proptest! {
    #[test]
    fn prop_first_result_wins(events in proptest::collection::vec(arb_event(), 0..40)) {
        let mut rec = StreamReconciler::new();
        let mut first_results: HashMap<String, Value> = HashMap::new();
        let mut started: Vec<String> = Vec::new();
        let mut text = String::new();

        for event in events {
            match &event {
                StreamEvent::TextDelta(d) => text.push_str(d),
                StreamEvent::ToolCallStart { tool_call_id, .. } => {
                    if !started.contains(tool_call_id) {
                        started.push(tool_call_id.clone());
                    }
                }
                StreamEvent::ToolCallResult { tool_call_id, result } => {
                    if started.contains(tool_call_id) {
                        first_results
                            .entry(tool_call_id.clone())
                            .or_insert_with(|| result.clone());
                    }
                }
                StreamEvent::Finish => {}
            }
            let _ = rec.apply(event);
        }

        prop_assert_eq!(&rec.draft().content, &text);
        let ids: Vec<_> = rec
            .draft()
            .tool_invocations
            .iter()
            .map(|inv| inv.tool_call_id.clone())
            .collect();
        prop_assert_eq!(ids, started);

        for inv in &rec.draft().tool_invocations {
            prop_assert_eq!(inv.result(), first_results.get(&inv.tool_call_id));
        }
    }

    #[test]
    fn prop_prefix_is_preserved(
        texts in proptest::collection::vec("[a-z]{1,10}", 0..6),
        reply in "[a-z]{1,10}",
    ) {
        let prefix: Vec<Message> = texts.iter().map(Message::user).collect();
        let mut rec = StreamReconciler::new();
        rec.apply(StreamEvent::TextDelta(reply.clone())).unwrap();
        rec.apply(StreamEvent::Finish).unwrap();

        let history = rec.finish(prefix.clone());
        prop_assert_eq!(history.len(), prefix.len() + 1);
        prop_assert_eq!(&history[..prefix.len()], &prefix[..]);
        prop_assert_eq!(&history[prefix.len()].content, &reply);
    }
}
