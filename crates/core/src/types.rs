use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Lifecycle state of a session's task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No task assigned yet.
    Idle,
    /// The driver is executing the current task.
    Running,
    /// The driver was told to pause; the task is still assigned.
    Paused,
    /// The driver reported success.
    Completed,
    /// The driver reported a failure.
    Failed,
    /// The task was cancelled by `stop`.
    Stopped,
    /// A bounded wait expired before the task finished.
    Timeout,
}

impl SessionState {
    /// A task is active while it is running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
            SessionState::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions accepted by the session controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StartSession,
    RunTask,
    RunTaskAndWait,
    GetStatus,
    GetResult,
    Pause,
    Resume,
    AddInstruction,
    UpdateTask,
    Stop,
    StopSession,
    ListSessions,
    GetLogs,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::StartSession,
        Action::RunTask,
        Action::RunTaskAndWait,
        Action::GetStatus,
        Action::GetResult,
        Action::Pause,
        Action::Resume,
        Action::AddInstruction,
        Action::UpdateTask,
        Action::Stop,
        Action::StopSession,
        Action::ListSessions,
        Action::GetLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::StartSession => "start_session",
            Action::RunTask => "run_task",
            Action::RunTaskAndWait => "run_task_and_wait",
            Action::GetStatus => "get_status",
            Action::GetResult => "get_result",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::AddInstruction => "add_instruction",
            Action::UpdateTask => "update_task",
            Action::Stop => "stop",
            Action::StopSession => "stop_session",
            Action::ListSessions => "list_sessions",
            Action::GetLogs => "get_logs",
        }
    }

    /// Whether the action addresses an existing session.
    pub fn needs_session(&self) -> bool {
        !matches!(self, Action::StartSession | Action::ListSessions)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::InvalidAction(s.to_string()))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single call into the controller, as received from a tool call,
/// a stdin line or an HTTP body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl ToolRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn action(&self) -> Result<Action> {
        non_empty(Some(self.action.as_str()))
            .ok_or(Error::MissingParameter("action"))?
            .parse()
    }

    pub fn require_session_id(&self) -> Result<&str> {
        non_empty(self.session_id.as_deref()).ok_or(Error::MissingParameter("session_id"))
    }

    pub fn require_task(&self) -> Result<&str> {
        non_empty(self.task.as_deref()).ok_or(Error::MissingParameter("task"))
    }

    pub fn require_instruction(&self) -> Result<&str> {
        non_empty(self.instruction.as_deref()).ok_or(Error::MissingParameter("instruction"))
    }

    /// Wait budget for `run_task_and_wait`; `default_secs` applies when unset.
    pub fn timeout(&self, default_secs: u64) -> Result<Duration> {
        match self.timeout_seconds {
            None => Ok(Duration::from_secs(default_secs)),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
            Some(secs) => Err(Error::Validation(format!(
                "timeout_seconds must be a positive number, got {}",
                secs
            ))),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Top-level `status` of a response: a session state, or `success`/`error`
/// for lookups and malformed requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
    Timeout,
}

impl From<SessionState> for ResponseStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Idle => ResponseStatus::Idle,
            SessionState::Running => ResponseStatus::Running,
            SessionState::Paused => ResponseStatus::Paused,
            SessionState::Completed => ResponseStatus::Completed,
            SessionState::Failed => ResponseStatus::Failed,
            SessionState::Stopped => ResponseStatus::Stopped,
            SessionState::Timeout => ResponseStatus::Timeout,
        }
    }
}

/// One row of `list_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub current_task: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured reply returned for every request, including failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_instructions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionSummary>>,
}

impl ToolResponse {
    pub fn new(status: impl Into<ResponseStatus>) -> Self {
        Self {
            status: status.into(),
            message: None,
            session_id: None,
            result: None,
            error: None,
            error_kind: None,
            current_task: None,
            merged_task: None,
            pending_instructions: None,
            created_at: None,
            updated_at: None,
            logs: None,
            sessions: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Success).with_message(message)
    }

    pub fn from_error(err: &Error) -> Self {
        let mut resp = Self::new(ResponseStatus::Error);
        resp.error = Some(err.to_string());
        resp.error_kind = Some(err.kind().to_string());
        resp
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a task failure while keeping the response's own status.
    pub fn with_failure(mut self, err: &Error) -> Self {
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind().to_string());
        self
    }

    pub fn with_current_task(mut self, task: Option<String>) -> Self {
        self.current_task = task;
        self
    }

    pub fn with_merged_task(mut self, task: impl Into<String>) -> Self {
        self.merged_task = Some(task.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }
}
