//! External tool (MCP) client boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A tool advertised by an external MCP server.
///
/// `full_name` is the server-qualified name the model calls; the catalog
/// sorts by it for prompt-cache stability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub full_name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Client for externally hosted tools. The concrete transport lives
/// outside this crate.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Establish connections to all configured servers.
    async fn connect_all(&self) -> Result<(), ToolError>;

    /// Every tool across all connected servers.
    async fn list_all_tools(&self) -> Result<Vec<McpToolDef>, ToolError>;

    /// Invoke a tool by its full name.
    async fn call_tool(&self, full_name: &str, args: serde_json::Value)
    -> Result<String, ToolError>;
}

/// Client with no servers configured. Calling a tool through it means the
/// model invented a name nothing registered.
pub struct NoopMcpClient;

#[async_trait]
impl McpClient for NoopMcpClient {
    async fn connect_all(&self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn list_all_tools(&self) -> Result<Vec<McpToolDef>, ToolError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        full_name: &str,
        _args: serde_json::Value,
    ) -> Result<String, ToolError> {
        Err(ToolError::NotFound {
            name: full_name.to_string(),
        })
    }
}
