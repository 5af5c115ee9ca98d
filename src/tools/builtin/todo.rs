//! Todo list tool, lock-guarded for mutations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::locks::{LockAcquire, LockManager};
use crate::tools::tool::{Tool, ToolContext, ToolGroup, require_str};
use crate::workspace::WorkspaceStore;

pub const TODO_TOOL: &str = "quill_todo";

/// Todo list CRUD. Mutating an existing list takes its resource lock first;
/// a conflict comes back as a structured result, not an error.
pub struct TodoTool {
    workspace: Arc<WorkspaceStore>,
    locks: Arc<LockManager>,
}

impl TodoTool {
    pub fn new(workspace: Arc<WorkspaceStore>, locks: Arc<LockManager>) -> Self {
        Self { workspace, locks }
    }

    /// Acquire the list's lock, or produce the conflict result text.
    fn guard(&self, ctx: &ToolContext, list_id: &str) -> Result<(), String> {
        match self
            .locks
            .acquire_lock(&ctx.scope, "todo", list_id, &ctx.session_id, None, None)
        {
            LockAcquire::Acquired(_) => Ok(()),
            LockAcquire::HeldBy(holder) => {
                Err(json!({"success": false, "held_by": holder}).to_string())
            }
        }
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        TODO_TOOL
    }

    fn description(&self) -> &str {
        "Manage todo lists in the workspace: list them, create a list, add items, \
         check or uncheck items, or delete a list. Mutations require the list's \
         resource lock; a conflict reports who currently holds it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "create", "add", "check", "uncheck", "delete"],
                },
                "list_id": { "type": "string" },
                "item_id": { "type": "string" },
                "title": { "type": "string", "description": "Title for create" },
                "text": { "type": "string", "description": "Item text for add" },
            },
            "required": ["action"],
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Workspace
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let action = require_str(TODO_TOOL, &params, "action")?;
        let fail = |e: crate::error::WorkspaceError| ToolError::ExecutionFailed {
            name: TODO_TOOL.to_string(),
            reason: e.to_string(),
        };

        match action {
            "list" => {
                let lists = self.workspace.list_todo_lists(&ctx.scope);
                Ok(serde_json::to_string(&lists).unwrap_or_default())
            }
            "create" => {
                let title = require_str(TODO_TOOL, &params, "title")?;
                let list = self.workspace.create_todo_list(&ctx.scope, title);
                Ok(json!({"success": true, "list_id": list.id}).to_string())
            }
            "add" => {
                let list_id = require_str(TODO_TOOL, &params, "list_id")?;
                let text = require_str(TODO_TOOL, &params, "text")?;
                if let Err(conflict) = self.guard(ctx, list_id) {
                    return Ok(conflict);
                }
                let item = self
                    .workspace
                    .add_todo_item(&ctx.scope, list_id, text)
                    .map_err(fail)?;
                Ok(json!({"success": true, "item_id": item.id}).to_string())
            }
            "check" | "uncheck" => {
                let list_id = require_str(TODO_TOOL, &params, "list_id")?;
                let item_id = require_str(TODO_TOOL, &params, "item_id")?;
                if let Err(conflict) = self.guard(ctx, list_id) {
                    return Ok(conflict);
                }
                self.workspace
                    .set_todo_done(&ctx.scope, list_id, item_id, action == "check")
                    .map_err(fail)?;
                Ok(json!({"success": true}).to_string())
            }
            "delete" => {
                let list_id = require_str(TODO_TOOL, &params, "list_id")?;
                if let Err(conflict) = self.guard(ctx, list_id) {
                    return Ok(conflict);
                }
                let deleted = self.workspace.delete_todo_list(&ctx.scope, list_id);
                self.locks
                    .release_lock(&ctx.scope, "todo", list_id, &ctx.session_id);
                Ok(json!({"success": deleted}).to_string())
            }
            other => Err(ToolError::InvalidParameters {
                name: TODO_TOOL.to_string(),
                reason: format!("unknown action '{other}'"),
            }),
        }
    }
}
