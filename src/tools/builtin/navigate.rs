//! Workspace navigation tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolGroup};
use crate::workspace::WorkspaceStore;

pub const NAVIGATE_TOOL: &str = "quill_navigate";

/// Read-only overview of workspace contents. Filtered out of
/// workflow-management sessions, which navigate through the engine instead.
pub struct NavigateTool {
    workspace: Arc<WorkspaceStore>,
}

impl NavigateTool {
    pub fn new(workspace: Arc<WorkspaceStore>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        NAVIGATE_TOOL
    }

    fn description(&self) -> &str {
        "Get an overview of the workspace: documents and todo lists with their \
         ids and titles. Read-only."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Navigation
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let documents: Vec<serde_json::Value> = self
            .workspace
            .list_documents(&ctx.scope)
            .iter()
            .map(|d| json!({"id": d.id, "title": d.title, "version": d.version}))
            .collect();
        let todo_lists: Vec<serde_json::Value> = self
            .workspace
            .list_todo_lists(&ctx.scope)
            .iter()
            .map(|l| json!({"id": l.id, "title": l.title, "items": l.items.len()}))
            .collect();
        Ok(json!({
            "documents": documents,
            "todo_lists": todo_lists,
        })
        .to_string())
    }
}
