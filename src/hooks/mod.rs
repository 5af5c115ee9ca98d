//! Hook pipeline: tool-name matching, interceptor registry, and the
//! per-event chain executor.
//!
//! Policy modules (permissions, audit, relation detection) register here and
//! compose without coupling to the chat loop.

pub mod executor;
pub mod hook;
pub mod matcher;
pub mod registry;

pub use executor::{
    HookExecutor, MemoryExtractDecision, MemoryInjectDecision, PostToolUseDecision,
    PreToolUseDecision,
};
pub use hook::{
    HookDecision, HookError, HookHandler, HookKind, HookRegistration, PostMemoryExtractOutcome,
    PostMemoryExtractPayload, PostToolUseOutcome, PostToolUsePayload, PreMemoryInjectOutcome,
    PreMemoryInjectPayload, PreToolUseOutcome, PreToolUsePayload,
};
pub use matcher::{ToolMatcher, extract_interact_details, extract_tool_action};
pub use registry::HookRegistry;
