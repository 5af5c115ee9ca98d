//! Rooted file I/O tool.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolGroup, optional_str, require_str};

pub const FILE_TOOL: &str = "quill_file";

/// File access confined to a configured root directory.
pub struct FileTool {
    root: PathBuf,
}

impl FileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a caller path under the root. Absolute paths are re-rooted;
    /// any `..` component is rejected outright.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ToolError::InvalidParameters {
                        name: FILE_TOOL.to_string(),
                        reason: format!("path escapes the workspace root: {path}"),
                    });
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        FILE_TOOL
    }

    fn description(&self) -> &str {
        "Read, write, append, delete, or list files inside the workspace file root. \
         Paths are always interpreted relative to that root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "write", "append", "delete", "list"],
                },
                "path": { "type": "string", "description": "Path relative to the file root" },
                "content": { "type": "string", "description": "Content for write/append" },
            },
            "required": ["action", "path"],
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let action = require_str(FILE_TOOL, &params, "action")?;
        let path = require_str(FILE_TOOL, &params, "path")?;
        let resolved = self.resolve(path)?;
        let fail = |e: std::io::Error| ToolError::ExecutionFailed {
            name: FILE_TOOL.to_string(),
            reason: format!("{path}: {e}"),
        };

        match action {
            "read" => tokio::fs::read_to_string(&resolved).await.map_err(fail),
            "write" => {
                let content = optional_str(&params, "content").unwrap_or_default();
                if let Some(parent) = resolved.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(fail)?;
                }
                tokio::fs::write(&resolved, content).await.map_err(fail)?;
                Ok(format!("Wrote {} bytes to {path}", content.len()))
            }
            "append" => {
                let content = optional_str(&params, "content").unwrap_or_default();
                let existing = match tokio::fs::read_to_string(&resolved).await {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(fail(e)),
                };
                tokio::fs::write(&resolved, existing + content)
                    .await
                    .map_err(fail)?;
                Ok(format!("Appended {} bytes to {path}", content.len()))
            }
            "delete" => {
                tokio::fs::remove_file(&resolved).await.map_err(fail)?;
                Ok(format!("Deleted {path}"))
            }
            "list" => {
                let mut entries = tokio::fs::read_dir(&resolved).await.map_err(fail)?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(fail)? {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(names.join("\n"))
            }
            other => Err(ToolError::InvalidParameters {
                name: FILE_TOOL.to_string(),
                reason: format!("unknown action '{other}'"),
            }),
        }
    }
}
