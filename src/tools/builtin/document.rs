//! Workspace document tool with fence-checked saves.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::locks::{LockAcquire, LockManager};
use crate::tools::tool::{Tool, ToolContext, ToolGroup, optional_str, require_str};
use crate::workspace::WorkspaceStore;

pub const DOCUMENT_TOOL: &str = "quill_document";

/// Read and save workspace documents. Saves take the document lock and pass
/// its fence token through to the store, so a superseded writer is rejected
/// instead of silently clobbering newer content.
pub struct DocumentTool {
    workspace: Arc<WorkspaceStore>,
    locks: Arc<LockManager>,
}

impl DocumentTool {
    pub fn new(workspace: Arc<WorkspaceStore>, locks: Arc<LockManager>) -> Self {
        Self { workspace, locks }
    }
}

#[async_trait]
impl Tool for DocumentTool {
    fn name(&self) -> &str {
        DOCUMENT_TOOL
    }

    fn description(&self) -> &str {
        "Read, list, save, or delete workspace documents. Saving acquires the \
         document's resource lock; if another session holds it, the result \
         reports the holder instead of writing."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "list", "save", "delete"],
                },
                "doc_id": { "type": "string" },
                "title": { "type": "string" },
                "content": { "type": "string", "description": "Full document content for save" },
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
        let action = require_str(DOCUMENT_TOOL, &params, "action")?;
        match action {
            "read" => {
                let doc_id = require_str(DOCUMENT_TOOL, &params, "doc_id")?;
                let doc = self.workspace.get_document(&ctx.scope, doc_id).ok_or_else(|| {
                    ToolError::ExecutionFailed {
                        name: DOCUMENT_TOOL.to_string(),
                        reason: format!("document not found: {doc_id}"),
                    }
                })?;
                // Read-audit row so later conflict heuristics know what
                // version this session last saw.
                self.locks.record_read(
                    &ctx.scope,
                    "document",
                    doc_id,
                    &ctx.session_id,
                    doc.version.to_string(),
                );
                Ok(doc.content)
            }
            "list" => {
                let docs = self.workspace.list_documents(&ctx.scope);
                let listing: Vec<serde_json::Value> = docs
                    .iter()
                    .map(|d| json!({"id": d.id, "title": d.title, "version": d.version}))
                    .collect();
                Ok(json!(listing).to_string())
            }
            "save" => {
                let doc_id = require_str(DOCUMENT_TOOL, &params, "doc_id")?;
                let content = require_str(DOCUMENT_TOOL, &params, "content")?;
                let title = optional_str(&params, "title").map(str::to_string);

                let lock = match self.locks.acquire_lock(
                    &ctx.scope,
                    "document",
                    doc_id,
                    &ctx.session_id,
                    Some("saving document".to_string()),
                    None,
                ) {
                    LockAcquire::Acquired(lock) => lock,
                    LockAcquire::HeldBy(holder) => {
                        return Ok(json!({"success": false, "held_by": holder}).to_string());
                    }
                };

                let doc = self
                    .workspace
                    .save_document(
                        &ctx.scope,
                        doc_id,
                        title,
                        content.to_string(),
                        &ctx.session_id,
                        lock.fence_token,
                    )
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: DOCUMENT_TOOL.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(json!({"success": true, "version": doc.version}).to_string())
            }
            "delete" => {
                let doc_id = require_str(DOCUMENT_TOOL, &params, "doc_id")?;
                if let LockAcquire::HeldBy(holder) = self.locks.acquire_lock(
                    &ctx.scope,
                    "document",
                    doc_id,
                    &ctx.session_id,
                    Some("deleting document".to_string()),
                    None,
                ) {
                    return Ok(json!({"success": false, "held_by": holder}).to_string());
                }
                let deleted = self.workspace.delete_document(&ctx.scope, doc_id);
                self.locks
                    .release_lock(&ctx.scope, "document", doc_id, &ctx.session_id);
                Ok(json!({"success": deleted}).to_string())
            }
            other => Err(ToolError::InvalidParameters {
                name: DOCUMENT_TOOL.to_string(),
                reason: format!("unknown action '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::locks::InMemoryLockStore;

    fn setup() -> (DocumentTool, Arc<LockManager>) {
        let events = EventBus::default();
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockStore::new()),
            events.clone(),
            60_000,
        ));
        let workspace = Arc::new(WorkspaceStore::new(locks.clone(), events));
        (DocumentTool::new(workspace, locks.clone()), locks)
    }

    #[tokio::test]
    async fn save_then_read_records_version() {
        let (tool, locks) = setup();
        let ctx = ToolContext::new("A", "main");

        let saved = tool
            .execute(
                json!({"action": "save", "doc_id": "doc-1", "content": "draft"}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(parsed["version"], 1);

        let content = tool
            .execute(json!({"action": "read", "doc_id": "doc-1"}), &ctx)
            .await
            .unwrap();
        assert_eq!(content, "draft");
        let read = locks.last_read("main", "document", "doc-1", "A").unwrap();
        assert_eq!(read.version, "1");
    }

    #[tokio::test]
    async fn save_reports_holder_on_conflict() {
        let (tool, locks) = setup();
        locks.acquire_lock("main", "document", "doc-1", "B", Some("editing".to_string()), None);

        let ctx = ToolContext::new("A", "main");
        let result = tool
            .execute(
                json!({"action": "save", "doc_id": "doc-1", "content": "mine"}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["held_by"]["session_id"], "B");
        assert_eq!(parsed["held_by"]["reason"], "editing");
    }
}
