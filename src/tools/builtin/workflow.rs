//! Workflow engine passthrough tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolGroup};
use crate::workflow::WorkflowEngine;

pub const WORKFLOW_TOOL: &str = "quill_workflow";

/// Delegates workflow operations to the external engine; the argument
/// shape is owned by the engine's own contract.
pub struct WorkflowTool {
    engine: Arc<dyn WorkflowEngine>,
}

impl WorkflowTool {
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for WorkflowTool {
    fn name(&self) -> &str {
        WORKFLOW_TOOL
    }

    fn description(&self) -> &str {
        "Run workflow-engine operations: start a workflow, check its status, \
         advance a step, or cancel it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string" },
                "workflow_id": { "type": "string" },
                "input": { "description": "Operation-specific payload" },
            },
            "required": ["operation"],
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Workflow
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        self.engine
            .execute(&ctx.scope, &ctx.session_id, params)
            .await
    }
}
