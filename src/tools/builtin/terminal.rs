//! Shell command execution tool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolGroup, require_str};

pub const TERMINAL_TOOL: &str = "quill_terminal";

/// Runs a shell command with a wall-clock timeout and captured output.
/// Permission rules gate this tool in every restrictive mode; by the time
/// execute runs, the call has already been approved or allowed.
pub struct TerminalTool {
    timeout: Duration,
}

impl TerminalTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        TERMINAL_TOOL
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its exit code, stdout, and stderr. \
         Long-running commands are killed at the configured timeout."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run" },
            },
            "required": ["command"],
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Terminal
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let command = require_str(TERMINAL_TOOL, &params, "command")?;

        let output = tokio::time::timeout(
            self.timeout,
            Command::new("sh").arg("-c").arg(command).output(),
        )
        .await
        .map_err(|_| ToolError::Timeout {
            name: TERMINAL_TOOL.to_string(),
            timeout: self.timeout,
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            name: TERMINAL_TOOL.to_string(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        })
        .to_string())
    }
}
