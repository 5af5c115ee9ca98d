//! Tool trait and invocation context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::session::BackgroundTask;

/// Category a builtin tool belongs to.
///
/// Drives group-based catalog filtering and the once-per-session first-call
/// hints appended after a category's first execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroup {
    Files,
    Workspace,
    Terminal,
    Locks,
    Workflow,
    Navigation,
    Results,
    WebSearch,
}

/// Per-invocation context threaded into every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub scope: String,
    /// Present only for background sessions; `quill_submit_result`
    /// validates submissions against its output spec.
    pub background_task: Option<BackgroundTask>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            scope: scope.into(),
            background_task: None,
        }
    }

    pub fn with_background_task(mut self, task: BackgroundTask) -> Self {
        self.background_task = Some(task);
        self
    }
}

/// Trait for tools the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get a description of what the tool does.
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Which catalog group this tool belongs to.
    fn group(&self) -> ToolGroup;

    /// Execute the tool. The returned string is the result text the model
    /// sees; domain-level conflicts (e.g. a held lock) come back as
    /// structured JSON inside an `Ok`, not as an `Err`.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError>;

    /// Definition advertised to the provider.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Extract a required string parameter from a JSON object.
pub fn require_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    name: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{name}' parameter"),
        })
}

/// Extract an optional string parameter.
pub fn optional_str<'a>(params: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str())
}
