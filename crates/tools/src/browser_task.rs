use async_trait::async_trait;
use serde_json::{json, Value};
use taskcell_core::{Action, Error, Result, ToolRequest};
use tracing::debug;

use crate::{Tool, ToolContext, ToolSchema};

const STRING_PARAMS: [&str; 4] = ["action", "session_id", "task", "instruction"];

/// Drives long-running automation tasks through session-scoped actions.
pub struct BrowserTaskTool;

#[async_trait]
impl Tool for BrowserTaskTool {
    fn schema(&self) -> ToolSchema {
        let actions: Vec<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
        ToolSchema {
            name: "browser_task",
            description: "Run and control long-running browser automation tasks in isolated sessions. \
                Start a session with start_session, then run_task (background) or run_task_and_wait \
                (blocks until done or timeout). Check progress with get_status/get_result, steer with \
                pause, resume, add_instruction (recorded for the next update) and update_task \
                (merges instructions and restarts the task). Use stop to cancel the task and \
                stop_session to release the session.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": actions,
                        "description": "Operation to perform"
                    },
                    "session_id": {
                        "type": "string",
                        "description": "Session to act on. Required for every action except start_session and list_sessions"
                    },
                    "task": {
                        "type": "string",
                        "description": "Task description. Required for run_task and run_task_and_wait"
                    },
                    "instruction": {
                        "type": "string",
                        "description": "Follow-up instruction. Required for add_instruction and update_task"
                    },
                    "timeout_seconds": {
                        "type": "number",
                        "description": "Wait budget for run_task_and_wait (default: 120)"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let obj = params
            .as_object()
            .ok_or_else(|| Error::Validation("parameters must be a JSON object".to_string()))?;

        for key in STRING_PARAMS {
            if let Some(v) = obj.get(key) {
                if !v.is_string() && !v.is_null() {
                    return Err(Error::Validation(format!("'{}' must be a string", key)));
                }
            }
        }
        if let Some(v) = obj.get("timeout_seconds") {
            if !v.is_number() && !v.is_null() {
                return Err(Error::Validation("'timeout_seconds' must be a number".to_string()));
            }
        }

        let action = obj
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or(Error::MissingParameter("action"))?;
        action.parse::<Action>()?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let controller = ctx
            .controller
            .as_ref()
            .ok_or_else(|| Error::Tool("Session controller not available".to_string()))?;

        let request: ToolRequest = serde_json::from_value(params)?;
        debug!(action = %request.action, session_id = ?request.session_id, "browser_task");
        let response = controller.perform(request).await;
        Ok(serde_json::to_value(response)?)
    }
}
