//! Resource lock introspection and management tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::locks::{LockAcquire, LockManager};
use crate::tools::tool::{Tool, ToolContext, ToolGroup, optional_str, require_str};

pub const LOCKS_TOOL: &str = "quill_locks";

/// Lets the model inspect and manage its own resource locks.
pub struct LocksTool {
    locks: Arc<LockManager>,
}

impl LocksTool {
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self { locks }
    }
}

#[async_trait]
impl Tool for LocksTool {
    fn name(&self) -> &str {
        LOCKS_TOOL
    }

    fn description(&self) -> &str {
        "Inspect and manage resource locks in this workspace: list live locks, \
         acquire or release a lock held by this session, or check one resource's \
         lock status."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "acquire", "release", "status"],
                },
                "resource_type": { "type": "string", "enum": ["document", "todo"] },
                "resource_id": { "type": "string" },
                "reason": { "type": "string" },
            },
            "required": ["action"],
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Locks
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let action = require_str(LOCKS_TOOL, &params, "action")?;
        match action {
            "list" => {
                let locks = self.locks.list_scope_locks(&ctx.scope);
                let listing: Vec<serde_json::Value> = locks
                    .iter()
                    .map(|l| {
                        json!({
                            "resource_type": l.key.resource_type,
                            "resource_id": l.key.resource_id,
                            "session_id": l.session_id,
                            "reason": l.reason,
                            "expires_at": l.expires_at(),
                        })
                    })
                    .collect();
                Ok(json!(listing).to_string())
            }
            "acquire" => {
                let resource_type = require_str(LOCKS_TOOL, &params, "resource_type")?;
                let resource_id = require_str(LOCKS_TOOL, &params, "resource_id")?;
                let reason = optional_str(&params, "reason").map(str::to_string);
                match self.locks.acquire_lock(
                    &ctx.scope,
                    resource_type,
                    resource_id,
                    &ctx.session_id,
                    reason,
                    None,
                ) {
                    LockAcquire::Acquired(lock) => {
                        Ok(json!({"success": true, "fence_token": lock.fence_token}).to_string())
                    }
                    LockAcquire::HeldBy(holder) => {
                        Ok(json!({"success": false, "held_by": holder}).to_string())
                    }
                }
            }
            "release" => {
                let resource_type = require_str(LOCKS_TOOL, &params, "resource_type")?;
                let resource_id = require_str(LOCKS_TOOL, &params, "resource_id")?;
                let released = self.locks.release_lock(
                    &ctx.scope,
                    resource_type,
                    resource_id,
                    &ctx.session_id,
                );
                Ok(json!({"success": released}).to_string())
            }
            "status" => {
                let resource_type = require_str(LOCKS_TOOL, &params, "resource_type")?;
                let resource_id = require_str(LOCKS_TOOL, &params, "resource_id")?;
                let lock = self
                    .locks
                    .list_scope_locks(&ctx.scope)
                    .into_iter()
                    .find(|l| {
                        l.key.resource_type == resource_type && l.key.resource_id == resource_id
                    });
                match lock {
                    Some(lock) => Ok(json!({
                        "locked": true,
                        "session_id": lock.session_id,
                        "reason": lock.reason,
                        "expires_at": lock.expires_at(),
                    })
                    .to_string()),
                    None => Ok(json!({"locked": false}).to_string()),
                }
            }
            other => Err(ToolError::InvalidParameters {
                name: LOCKS_TOOL.to_string(),
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

    #[tokio::test]
    async fn acquire_status_release_cycle() {
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockStore::new()),
            EventBus::default(),
            60_000,
        ));
        let tool = LocksTool::new(locks);
        let ctx = ToolContext::new("A", "main");

        let acquired = tool
            .execute(
                json!({"action": "acquire", "resource_type": "document", "resource_id": "doc-1"}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&acquired).unwrap();
        assert_eq!(parsed["success"], true);

        let status = tool
            .execute(
                json!({"action": "status", "resource_type": "document", "resource_id": "doc-1"}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(parsed["locked"], true);
        assert_eq!(parsed["session_id"], "A");

        let released = tool
            .execute(
                json!({"action": "release", "resource_type": "document", "resource_id": "doc-1"}),
                &ctx,
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&released).unwrap();
        assert_eq!(parsed["success"], true);
    }
}
