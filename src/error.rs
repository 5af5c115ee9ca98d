//! Error types for the orchestration core.

use std::time::Duration;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Hook error: {0}")]
    Hook(#[from] crate::hooks::HookError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Checkpoint not found: {checkpoint_id} in session {session_id}")]
    CheckpointNotFound {
        session_id: String,
        checkpoint_id: String,
    },

    #[error("Session {id} store operation failed: {reason}")]
    StoreFailed { id: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} stream failed: {reason}")]
    StreamFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} denied: {reason}")]
    Denied { name: String, reason: String },
}

/// Resource lock errors.
///
/// Lock *conflicts* are not errors — they come back as a structured
/// `LockAcquire::HeldBy` value. These variants cover genuinely broken states.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock store operation failed: {reason}")]
    StoreFailed { reason: String },

    #[error("Stale fence token {token} for {resource_type} {resource_id}")]
    StaleFence {
        resource_type: String,
        resource_id: String,
        token: u64,
    },
}

/// Permission engine errors.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Invalid permission rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Unknown permission mode: {mode}")]
    UnknownMode { mode: String },
}

/// Workspace store errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Document not found: {doc_id} in scope {scope}")]
    DocumentNotFound { scope: String, doc_id: String },

    #[error("Todo list not found: {list_id} in scope {scope}")]
    TodoListNotFound { scope: String, list_id: String },

    #[error("Stale write to {doc_id}: fence token {token} is no longer live")]
    StaleWrite { doc_id: String, token: u64 },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
