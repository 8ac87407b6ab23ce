use thiserror::Error;

use crate::types::SessionState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unknown action: {0}")]
    InvalidAction(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Cannot {action} while session is {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Max sessions ({0}) reached. Close a session first.")]
    SessionLimit(usize),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable tag reported as `error_kind` in responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "session_not_found",
            Error::InvalidAction(_) => "invalid_action",
            Error::MissingParameter(_) => "missing_parameter",
            Error::InvalidState { .. } => "invalid_state",
            Error::Driver(_) => "driver_error",
            Error::Timeout(_) => "timeout",
            Error::SessionLimit(_) => "session_limit",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::Tool(_) => "tool",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_names_offending_state() {
        let err = Error::InvalidState {
            action: "pause",
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot pause while session is idle");
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Error::SessionNotFound("x".into()).kind(), "session_not_found");
        assert_eq!(Error::MissingParameter("task").kind(), "missing_parameter");
        assert_eq!(Error::Driver("boom".into()).kind(), "driver_error");
    }
}
