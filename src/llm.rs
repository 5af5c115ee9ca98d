//! Chat provider trait and streaming types.
//!
//! Concrete provider adapters (OpenAI/Ollama-style clients) live outside
//! this crate; the orchestrator only depends on [`ChatProvider`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::session::{Role, TokenUsage};

/// A message as sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool call ID if this is a tool result message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool for tool results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant. The wire protocol requires these
    /// to appear on the assistant message preceding tool result messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    /// Create an assistant message that includes tool calls.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.unwrap_or_default(),
            tool_call_id: None,
            name: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            tool_calls: None,
        }
    }
}

/// A completed tool call extracted from the model's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, opaque until the execution stage parses it.
    pub arguments: String,
}

/// JSON-schema-shaped tool definition advertised to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One chunk of a streaming chat response.
///
/// Fields are all optional; providers populate whichever apply. A chunk
/// with `done: true` carries the accumulated `tool_calls` (possibly empty)
/// and final `usage`.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental assistant text.
    pub text: Option<String>,
    /// Incremental reasoning/thinking text.
    pub reasoning: Option<String>,
    /// A tool call announced before its arguments finish streaming, as
    /// `(id, name)`.
    pub tool_call_preparing: Option<(String, String)>,
    /// Incremental argument text for an in-flight tool call.
    pub tool_call_args_delta: Option<(String, String)>,
    /// Fully accumulated tool calls, present on the final chunk.
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<TokenUsage>,
    pub done: bool,
}

/// Options for one streaming chat invocation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolDefinition>,
    /// Routes identical tool sets to the same provider-side cache bucket.
    pub prompt_cache_key: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: None,
            tools: Vec::new(),
            prompt_cache_key: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prompt_cache_key(mut self, key: impl Into<String>) -> Self {
        self.prompt_cache_key = Some(key.into());
        self
    }
}

/// Streaming LLM provider boundary.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Start a streaming chat. The stream yields chunks until one with
    /// `done: true`; a stream error fails the whole turn.
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, LlmError>>, LlmError>;
}

/// Deterministic cache key over the scope and the sorted tool-name list.
///
/// Identical tool sets hash identically regardless of assembly order, so
/// provider-side prompt caching keeps hitting across turns.
pub fn prompt_cache_key(scope: &str, tools: &[ToolDefinition]) -> String {
    let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    hasher.update(scope.as_bytes());
    for name in names {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn cache_key_is_order_independent() {
        let a = prompt_cache_key("main", &[def("quill_file"), def("quill_todo")]);
        let b = prompt_cache_key("main", &[def("quill_todo"), def("quill_file")]);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_varies_by_scope_and_tool_set() {
        let base = prompt_cache_key("main", &[def("quill_file")]);
        assert_ne!(base, prompt_cache_key("other", &[def("quill_file")]));
        assert_ne!(base, prompt_cache_key("main", &[def("quill_todo")]));
    }

    #[test]
    fn assistant_with_empty_tool_calls_serializes_without_field() {
        let msg = ChatMessage::assistant_with_tool_calls(Some("hi".to_string()), vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
    }
}
