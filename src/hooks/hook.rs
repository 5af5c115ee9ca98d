//! Hook kinds, payloads, per-event outcomes, and the handler trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::interact::InteractDetails;
use crate::memory::{MemoryBundle, MemoryItem};

/// Extension points in the tool-execution and memory pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PreToolUse,
    PostToolUse,
    PreMemoryInject,
    PostMemoryExtract,
}

/// Hook execution errors.
///
/// A failing hook never aborts the chain; the executor logs the error and
/// continues as if the hook had returned no opinion.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Hook {id} failed: {reason}")]
    ExecutionFailed { id: String, reason: String },
}

/// A hook's opinion on an imminent tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookDecision {
    #[default]
    Allow,
    Ask,
    Deny,
}

/// Payload for [`HookKind::PreToolUse`].
#[derive(Debug, Clone)]
pub struct PreToolUsePayload {
    pub session_id: String,
    pub scope: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Paths already authorized for this session.
    pub granted_paths: Vec<String>,
}

/// One hook's result for a PreToolUse event.
#[derive(Debug, Clone, Default)]
pub struct PreToolUseOutcome {
    pub decision: HookDecision,
    pub deny_message: Option<String>,
    pub interact_details: Option<InteractDetails>,
    /// Replacement arguments, visible to later hooks in the chain.
    pub updated_arguments: Option<Value>,
    pub additional_context: Option<String>,
}

impl PreToolUseOutcome {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::Deny,
            deny_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn ask(details: InteractDetails) -> Self {
        Self {
            decision: HookDecision::Ask,
            interact_details: Some(details),
            ..Self::default()
        }
    }
}

/// Payload for [`HookKind::PostToolUse`].
#[derive(Debug, Clone)]
pub struct PostToolUsePayload {
    pub session_id: String,
    pub scope: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: String,
    pub error: bool,
}

/// One hook's result for a PostToolUse event.
#[derive(Debug, Clone, Default)]
pub struct PostToolUseOutcome {
    /// Rewritten result text, visible to later hooks.
    pub replace_result: Option<String>,
    pub additional_context: Option<String>,
}

/// Payload for [`HookKind::PreMemoryInject`].
#[derive(Debug, Clone)]
pub struct PreMemoryInjectPayload {
    pub session_id: String,
    pub scope: String,
    pub bundle: MemoryBundle,
    pub query: Option<String>,
}

/// One hook's result for a PreMemoryInject event.
#[derive(Debug, Clone, Default)]
pub struct PreMemoryInjectOutcome {
    /// Replacement bundle, visible to later hooks.
    pub replace_bundle: Option<MemoryBundle>,
    /// Retrieval query override; last override in the chain wins.
    pub override_query: Option<String>,
}

/// Payload for [`HookKind::PostMemoryExtract`].
#[derive(Debug, Clone)]
pub struct PostMemoryExtractPayload {
    pub session_id: String,
    pub scope: String,
    pub extracted: Vec<MemoryItem>,
}

/// One hook's result for a PostMemoryExtract event.
#[derive(Debug, Clone, Default)]
pub struct PostMemoryExtractOutcome {
    /// Memory ids to drop from the extraction.
    pub exclude_ids: Vec<String>,
}

/// Trait for interceptor callbacks.
///
/// Implement only the methods for the events the hook registers for; the
/// defaults return no opinion.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn pre_tool_use(
        &self,
        _payload: &PreToolUsePayload,
    ) -> Result<PreToolUseOutcome, HookError> {
        Ok(PreToolUseOutcome::default())
    }

    async fn post_tool_use(
        &self,
        _payload: &PostToolUsePayload,
    ) -> Result<PostToolUseOutcome, HookError> {
        Ok(PostToolUseOutcome::default())
    }

    async fn pre_memory_inject(
        &self,
        _payload: &PreMemoryInjectPayload,
    ) -> Result<PreMemoryInjectOutcome, HookError> {
        Ok(PreMemoryInjectOutcome::default())
    }

    async fn post_memory_extract(
        &self,
        _payload: &PostMemoryExtractPayload,
    ) -> Result<PostMemoryExtractOutcome, HookError> {
        Ok(PostMemoryExtractOutcome::default())
    }
}

/// A registered interceptor.
#[derive(Clone)]
pub struct HookRegistration {
    /// Unique id; registering the same id again replaces the entry.
    pub id: String,
    pub kind: HookKind,
    /// Tool-name filter; hooks without one always match.
    pub matcher: Option<crate::hooks::ToolMatcher>,
    /// Lower runs first.
    pub priority: i32,
    pub handler: Arc<dyn HookHandler>,
}

impl HookRegistration {
    pub fn new(
        id: impl Into<String>,
        kind: HookKind,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            matcher: None,
            priority,
            handler,
        }
    }

    /// Restrict the hook to tools matching `matcher`.
    pub fn with_matcher(mut self, matcher: crate::hooks::ToolMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
