pub mod browser_task;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use taskcell_core::{Config, Result, ToolRequest, ToolResponse};

pub use browser_task::BrowserTaskTool;
pub use registry::ToolRegistry;

/// Trait abstracting the session controller for tools.
/// This avoids a circular dependency between the tools and agent crates.
#[async_trait]
pub trait SessionControllerOps: Send + Sync {
    /// Dispatch one request. Failures come back as error responses.
    async fn perform(&self, request: ToolRequest) -> ToolResponse;
}

/// Opaque handle to the session controller, passed through ToolContext.
pub type ControllerHandle = Arc<dyn SessionControllerOps>;

#[derive(Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    pub config: Config,
    pub controller: Option<ControllerHandle>,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}
