//! Quill: the agent-orchestration core of a personal knowledge/workspace
//! assistant.
//!
//! The crate drives multi-turn LLM conversations that call tools, mutate
//! shared workspace resources (documents, files, todo lists), and stay safe
//! when multiple sessions or human API clients touch the same resources
//! concurrently. Four subsystems carry that:
//!
//! - [`chat`] — the streaming conversation loop: context assembly, tool-set
//!   assembly, provider stream consumption, concurrent tool execution, and
//!   the human-approval protocol, across unbounded rounds.
//! - [`hooks`] — a priority-ordered interceptor chain (PreToolUse,
//!   PostToolUse, PreMemoryInject, PostMemoryExtract) that lets policy
//!   modules compose without coupling to the loop.
//! - [`permissions`] — mode-based tool gating (allow / ask / deny) with
//!   per-session custom rules, exposed to the loop as a builtin hook.
//! - [`locks`] — fencing-token resource locks with TTL-based lazy expiry,
//!   the only mechanism for exclusive access to shared resources.
//!
//! Storage, LLM transport, MCP connections, and the approval channel are
//! collaborators behind traits ([`session::SessionStore`],
//! [`llm::ChatProvider`], [`mcp::McpClient`], [`search::SearchProvider`],
//! [`memory::MemoryProvider`]); the core never talks to the outside world
//! directly. Side effects it does not own are announced on the
//! [`events::EventBus`] instead of called into.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod interact;
pub mod llm;
pub mod locks;
pub mod mcp;
pub mod memory;
pub mod permissions;
pub mod search;
pub mod session;
pub mod tools;
pub mod workflow;
pub mod workspace;

pub use chat::{AgentOrchestrator, ChatEvent, ChatOptions, OrchestratorDeps};
pub use config::OrchestratorConfig;
pub use error::Error;
pub use events::{DomainEvent, EventBus};
pub use interact::{InteractDetails, InteractionManager, InteractionRequest, InteractionResponse};
pub use locks::{LockAcquire, LockManager};
pub use permissions::{PermissionManager, PermissionMode};
pub use session::{AgentMessage, AgentSession, SessionStore, ToolCallStatus};
