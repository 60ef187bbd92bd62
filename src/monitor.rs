//! Survey handoff detection
//!
//! Watches tool-result transitions for the survey-generation trigger and
//! raises a confirmation signal for the UI. History is never touched here.

use crate::message::{Message, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const TRIGGER_TOOL_NAME: &str = "triggerSurveyGeneration";
pub const SHOW_BUTTON_ACTION: &str = "show_survey_generation_button";

/// Payload shown to the user when requirements gathering is complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyHandoff {
    pub tool_call_id: String,
    pub message: String,
    pub requirements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonitorState {
    #[default]
    Active,
    AwaitingConfirmation(SurveyHandoff),
}

impl MonitorState {
    pub fn handoff(&self) -> Option<&SurveyHandoff> {
        match self {
            MonitorState::Active => None,
            MonitorState::AwaitingConfirmation(handoff) => Some(handoff),
        }
    }
}

#[derive(Debug, Default)]
pub struct ToolEventMonitor {
    state: MonitorState,
    processed: HashSet<String>,
}

impl ToolEventMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Feed one tool-result transition. Returns the handoff when this call raised it.
    pub fn observe(&mut self, invocation: &ToolInvocation) -> Option<SurveyHandoff> {
        if invocation.tool_name != TRIGGER_TOOL_NAME {
            return None;
        }
        let result = invocation.result()?;
        if !self.processed.insert(invocation.tool_call_id.clone()) {
            return None;
        }

        let Some(handoff) = parse_trigger_result(&invocation.tool_call_id, result) else {
            tracing::debug!(
                tool_call_id = %invocation.tool_call_id,
                "Ignoring trigger result without expected payload"
            );
            return None;
        };

        tracing::info!(
            tool_call_id = %handoff.tool_call_id,
            requirements = handoff.requirements.len(),
            "Survey handoff raised"
        );
        self.state = MonitorState::AwaitingConfirmation(handoff.clone());
        Some(handoff)
    }

    /// Replay the resolved invocations of the most recent message after loading history.
    pub fn prime(&mut self, history: &[Message]) -> Option<SurveyHandoff> {
        let last = history.last()?;
        let mut raised = None;
        for invocation in last.tool_invocations.iter().filter(|inv| inv.is_resolved()) {
            if let Some(handoff) = self.observe(invocation) {
                raised = Some(handoff);
            }
        }
        raised
    }

    /// Re-derive the pending handoff after the history was replaced wholesale.
    /// A pending handoff survives only while the last message still carries
    /// its trigger result; triggers seen before are not raised again.
    pub fn rebase(&mut self, history: &[Message]) -> Option<SurveyHandoff> {
        if let MonitorState::AwaitingConfirmation(handoff) = &self.state {
            let backed = history.last().is_some_and(|last| {
                last.tool_invocation(&handoff.tool_call_id)
                    .is_some_and(ToolInvocation::is_resolved)
            });
            if !backed {
                tracing::debug!(tool_call_id = %handoff.tool_call_id, "Pending handoff no longer in history");
                self.state = MonitorState::Active;
            }
        }
        self.prime(history)
    }

    /// Returns whether a pending handoff was cleared
    pub fn dismiss(&mut self) -> bool {
        let was_awaiting = matches!(self.state, MonitorState::AwaitingConfirmation(_));
        self.state = MonitorState::Active;
        was_awaiting
    }
}

fn parse_trigger_result(tool_call_id: &str, result: &serde_json::Value) -> Option<SurveyHandoff> {
    if result.get("action")?.as_str()? != SHOW_BUTTON_ACTION {
        return None;
    }
    let message = result.get("message")?.as_str()?.to_string();
    let requirements = result
        .get("requirements")?
        .as_array()?
        .iter()
        .map(|r| r.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    Some(SurveyHandoff {
        tool_call_id: tool_call_id.to_string(),
        message,
        requirements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn trigger(id: &str, result: Option<Value>) -> ToolInvocation {
        let mut inv = ToolInvocation::call(
            id,
            TRIGGER_TOOL_NAME,
            json!({"message": "All set", "requirements": ["req1", "req2"]}),
        );
        if let Some(result) = result {
            inv.resolve(result);
        }
        inv
    }

    fn button(message: &str, requirements: &[&str]) -> Value {
        json!({
            "action": SHOW_BUTTON_ACTION,
            "message": message,
            "requirements": requirements,
            "timestamp": "2025-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_trigger_raises_then_dismiss() {
        let mut monitor = ToolEventMonitor::new();
        let raised = monitor
            .observe(&trigger("t1", Some(button("All set", &["req1", "req2"]))))
            .unwrap();

        assert_eq!(raised.message, "All set");
        assert_eq!(raised.requirements, vec!["req1", "req2"]);
        assert_eq!(monitor.state().handoff(), Some(&raised));

        assert!(monitor.dismiss());
        assert_eq!(monitor.state(), &MonitorState::Active);
        assert!(!monitor.dismiss());
    }

    #[test]
    fn test_processed_id_never_raises_again() {
        let mut monitor = ToolEventMonitor::new();
        let inv = trigger("t1", Some(button("All set", &[])));
        assert!(monitor.observe(&inv).is_some());
        monitor.dismiss();

        assert!(monitor.observe(&inv).is_none());
        assert_eq!(monitor.state(), &MonitorState::Active);

        assert!(monitor
            .observe(&trigger("t2", Some(button("Again", &[]))))
            .is_some());
    }

    #[test]
    fn test_call_state_is_ignored() {
        let mut monitor = ToolEventMonitor::new();
        assert!(monitor.observe(&trigger("t1", None)).is_none());
        // The later result for the same id still counts
        assert!(monitor
            .observe(&trigger("t1", Some(button("All set", &[]))))
            .is_some());
    }

    #[test]
    fn test_other_tools_and_bad_payloads_ignored() {
        let mut monitor = ToolEventMonitor::new();

        let mut search = ToolInvocation::call("s1", "tavilySearch", json!({}));
        search.resolve(button("x", &[]));
        assert!(monitor.observe(&search).is_none());

        let wrong_action = json!({"action": "noop", "message": "m", "requirements": []});
        assert!(monitor.observe(&trigger("t1", Some(wrong_action))).is_none());

        let bad_reqs = json!({"action": SHOW_BUTTON_ACTION, "message": "m", "requirements": [1]});
        assert!(monitor.observe(&trigger("t2", Some(bad_reqs))).is_none());

        assert_eq!(monitor.state(), &MonitorState::Active);
    }

    #[test]
    fn test_prime_uses_last_message_only() {
        let mut older = Message::assistant("");
        older
            .tool_invocations
            .push(trigger("old", Some(button("Stale", &[]))));

        let mut monitor = ToolEventMonitor::new();
        assert!(monitor
            .prime(&[older.clone(), Message::user("one more thing")])
            .is_none());

        let mut monitor = ToolEventMonitor::new();
        let raised = monitor.prime(&[Message::user("hi"), older]).unwrap();
        assert_eq!(raised.message, "Stale");
    }

    #[test]
    fn test_rebase_drops_handoff_missing_from_new_history() {
        let mut with_trigger = Message::assistant("");
        with_trigger
            .tool_invocations
            .push(trigger("t1", Some(button("All set", &[]))));

        let mut monitor = ToolEventMonitor::new();
        assert!(monitor.prime(&[Message::user("done"), with_trigger.clone()]).is_some());

        // Same trigger still last: kept, not re-raised
        assert!(monitor.rebase(&[Message::user("done"), with_trigger.clone()]).is_none());
        assert!(monitor.state().handoff().is_some());

        // Rewritten history no longer ends with it
        assert!(monitor.rebase(&[Message::user("start over")]).is_none());
        assert_eq!(monitor.state(), &MonitorState::Active);

        // A dismissed trigger does not come back through a rewrite
        assert!(monitor.rebase(&[with_trigger]).is_none());
        assert_eq!(monitor.state(), &MonitorState::Active);
    }
}
