//! Web search / fetch collaborator boundary.

use async_trait::async_trait;

use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// Tool names the execution stage routes to the search provider instead of
/// the builtin registry or MCP.
pub const WEB_SEARCH_TOOL: &str = "quill_web_search";
pub const WEB_FETCH_TOOL: &str = "quill_web_fetch";

/// Whether a tool name belongs to the search provider.
pub fn is_search_tool(name: &str) -> bool {
    name == WEB_SEARCH_TOOL || name == WEB_FETCH_TOOL
}

/// External search/fetch provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Definitions advertised to the model when web search is enabled.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a search-family tool call.
    async fn execute(&self, tool_name: &str, args: serde_json::Value)
    -> Result<String, ToolError>;
}
