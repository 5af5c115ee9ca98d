//! Workflow engine collaborator boundary.
//!
//! The workflow DSL and its executor live outside this crate; the
//! `quill_workflow` tool delegates here.

use async_trait::async_trait;

use crate::error::ToolError;

/// External workflow engine invoked through the tool-call interface.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Run one workflow operation (start/status/cancel and friends are
    /// encoded in `args` by the engine's own contract).
    async fn execute(
        &self,
        scope: &str,
        session_id: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolError>;
}
