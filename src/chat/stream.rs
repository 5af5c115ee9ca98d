//! Streaming output protocol of the chat loop.
//!
//! The event sequence and the status strings are a wire contract with
//! clients; tests pin them byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::interact::InteractionRequest;
pub use crate::session::ToolCallStatus;
use crate::session::TokenUsage;

/// One typed event on a chat stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// Incremental reasoning text.
    ReasoningDelta { text: String },
    /// A tool call moved to a new lifecycle status.
    ToolStatus {
        tool_call_id: String,
        tool_name: String,
        status: ToolCallStatus,
    },
    /// Still-running heartbeat for a slow tool execution.
    ToolProgress {
        tool_call_id: String,
        elapsed_ms: u64,
    },
    /// One fixed-size piece of an oversized tool result.
    ToolResultChunk {
        tool_call_id: String,
        chunk: String,
        last: bool,
    },
    /// A human approval is required before the tool call proceeds.
    InteractRequest { request: InteractionRequest },
    /// The loop finished; carries aggregate token usage.
    Done { usage: TokenUsage },
    /// Provider or stream failure that ended the turn.
    Error { message: String },
}

/// Split a result into fixed-size chunks on UTF-8 boundaries.
///
/// Results at or under `size` come back as a single chunk; the split only
/// exists to keep any one stream frame bounded.
pub fn result_chunks(text: &str, size: usize) -> Vec<String> {
    // A zero size would never advance the split below.
    let size = size.max(1);
    if text.len() <= size {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}
