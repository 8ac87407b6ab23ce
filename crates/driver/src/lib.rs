//! Driver adapters: the actuators that actually perform a task.
//!
//! The session controller only talks to the [`Driver`] trait. A driver owns
//! whatever heavy resource backs a session (a browser, a child process) and
//! hands out an opaque [`DriverHandle`] for it.

pub mod command;
pub mod factory;
pub mod scripted;

use async_trait::async_trait;
use serde_json::Value;
use taskcell_core::Result;

/// Opaque reference to the resources a driver allocated in `start`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverHandle(String);

impl DriverHandle {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate the actuator for a new session.
    async fn start(&self) -> Result<DriverHandle>;

    /// Run one task to completion. Resolves with the task output, or an error
    /// when the actuation fails or is stopped.
    async fn execute(&self, handle: &DriverHandle, task: &str) -> Result<Value>;

    async fn pause(&self, handle: &DriverHandle) -> Result<()>;

    async fn resume(&self, handle: &DriverHandle) -> Result<()>;

    /// Ask the in-flight `execute` to halt. May return before it actually does.
    async fn stop(&self, handle: &DriverHandle) -> Result<()>;

    /// Release the actuator. The handle is invalid afterwards.
    async fn close(&self, handle: &DriverHandle) -> Result<()>;
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}\n... (output truncated)", &s[..end]),
        None => s.to_string(),
    }
}

pub use command::CommandDriver;
pub use factory::create_driver;
pub use scripted::{DriverCall, ScriptedDriver};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = DriverHandle::generate();
        let b = DriverHandle::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo\n... (output truncated)");
    }
}
