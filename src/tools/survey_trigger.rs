//! Survey generation trigger
//!
//! Called by the assistant once every requirement has been gathered. The
//! result is what the handoff monitor looks for.

use super::{Tool, ToolContext, ToolOutput};
use crate::monitor::{SHOW_BUTTON_ACTION, TRIGGER_TOOL_NAME};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub struct SurveyTriggerTool;

#[derive(Debug, Deserialize)]
struct TriggerInput {
    message: String,
    requirements: Vec<String>,
}

#[async_trait]
impl Tool for SurveyTriggerTool {
    fn name(&self) -> &'static str {
        TRIGGER_TOOL_NAME
    }

    fn description(&self) -> String {
        "Trigger the survey generation button to appear when all requirements have been gathered from the user".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["message", "requirements"],
            "properties": {
                "message": {
                    "type": "string",
                    "description": "A message to display to the user explaining that requirements are complete and they can proceed"
                },
                "requirements": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of requirements that have been gathered"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: TriggerInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        tracing::info!(
            conversation_id = %ctx.conversation_id,
            requirements = input.requirements.len(),
            "Survey generation triggered"
        );

        ToolOutput::success(json!({
            "action": SHOW_BUTTON_ACTION,
            "message": input.message,
            "requirements": input.requirements,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }
}
