//! Context assembly for one chat round.
//!
//! The system prompt is split in two on purpose: a session-static prefix
//! that never changes across turns (so provider-side prompt caching can
//! reuse it) and a per-turn-dynamic suffix carrying workspace state, live
//! locks, injected memories, and resolved references.

use std::sync::Arc;

use regex::Regex;

use crate::config::{OrchestratorConfig, ReferenceInjection};
use crate::hooks::{HookExecutor, PreMemoryInjectPayload};
use crate::llm::ChatMessage;
use crate::locks::LockManager;
use crate::memory::{MemoryBundle, MemoryProvider};
use crate::session::{AgentSession, MessagePart, Role, SessionKind};
use crate::workspace::WorkspaceStore;

/// One parsed `@`-reference from a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub key: String,
    pub id: String,
}

// Parenthesized form allows spaces in the value; bare form stops at word
// characters, dots, and dashes.
static REFERENCE_RE: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"@\((\w+):([^)]+)\)|@(\w+):([\w.\-]+)").unwrap());

/// Parse `@(key:value)` and `@key:id` references out of a message.
pub fn parse_references(text: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for captures in REFERENCE_RE.captures_iter(text) {
        let (key, id) = if let (Some(key), Some(id)) = (captures.get(1), captures.get(2)) {
            (key.as_str(), id.as_str())
        } else if let (Some(key), Some(id)) = (captures.get(3), captures.get(4)) {
            (key.as_str(), id.as_str())
        } else {
            continue;
        };
        let reference = Reference {
            key: key.to_string(),
            id: id.trim().to_string(),
        };
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}

/// Builds the message list sent to the provider each round.
pub struct ContextBuilder {
    workspace: Arc<WorkspaceStore>,
    memory: Arc<dyn MemoryProvider>,
    locks: Arc<LockManager>,
    hooks: HookExecutor,
    config: Arc<OrchestratorConfig>,
}

impl ContextBuilder {
    pub fn new(
        workspace: Arc<WorkspaceStore>,
        memory: Arc<dyn MemoryProvider>,
        locks: Arc<LockManager>,
        hooks: HookExecutor,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            workspace,
            memory,
            locks,
            hooks,
            config,
        }
    }

    /// Assemble the full provider message list for one round.
    pub async fn build(&self, session: &AgentSession) -> Vec<ChatMessage> {
        let last_user_text = session
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text_content());

        let references = last_user_text
            .as_deref()
            .map(parse_references)
            .unwrap_or_default();
        let reference_content = self.resolve_references(&session.scope, &references);

        let memories = self
            .inject_memories(session, last_user_text.as_deref())
            .await;

        let mut messages = vec![
            ChatMessage::system(static_prompt(session)),
            ChatMessage::system(self.dynamic_prompt(session, &memories, &reference_content)),
        ];

        let inline_refs = self.config.reference_injection == ReferenceInjection::UserMessage
            && !reference_content.is_empty();
        let last_user_index = session
            .messages
            .iter()
            .rposition(|m| m.role == Role::User);

        for (index, message) in session.messages.iter().enumerate() {
            match message.role {
                Role::User => {
                    let mut text = message.text_content();
                    if inline_refs && Some(index) == last_user_index {
                        text = format!("{}\n\n{text}", reference_content.join("\n\n"));
                    }
                    messages.push(ChatMessage::user(text));
                }
                Role::System => messages.push(ChatMessage::system(message.text_content())),
                Role::Assistant => {
                    let mut tool_calls = Vec::new();
                    let mut tool_results = Vec::new();
                    for part in &message.parts {
                        if let MessagePart::ToolCall {
                            id,
                            name,
                            arguments,
                            result,
                            ..
                        } = part
                        {
                            tool_calls.push(crate::llm::ToolCall {
                                id: id.clone(),
                                name: name.clone(),
                                arguments: arguments.clone(),
                            });
                            if let Some(result) = result {
                                tool_results.push(ChatMessage::tool_result(id, name, result));
                            }
                        }
                    }
                    let text = message.text_content();
                    if tool_calls.is_empty() {
                        messages.push(ChatMessage::assistant(text));
                    } else {
                        messages.push(ChatMessage::assistant_with_tool_calls(
                            Some(text),
                            tool_calls,
                        ));
                        messages.extend(tool_results);
                    }
                }
                Role::Tool => {
                    // Tool-role messages carry their call id in the first
                    // tool part; text-only tool messages are skipped.
                    for part in &message.parts {
                        if let MessagePart::ToolCall {
                            id, name, result, ..
                        } = part
                        {
                            messages.push(ChatMessage::tool_result(
                                id,
                                name,
                                result.as_deref().unwrap_or(""),
                            ));
                        }
                    }
                }
            }
        }

        messages
    }

    /// Retrieve memories for this turn and fold them through the
    /// PreMemoryInject chain. A hook-overridden query triggers one fresh
    /// retrieval with the new query.
    async fn inject_memories(
        &self,
        session: &AgentSession,
        query: Option<&str>,
    ) -> MemoryBundle {
        let bundle = self
            .memory
            .retrieve(&session.scope, &session.id, query)
            .await;
        let decision = self
            .hooks
            .pre_memory_inject(&PreMemoryInjectPayload {
                session_id: session.id.clone(),
                scope: session.scope.clone(),
                bundle,
                query: query.map(str::to_string),
            })
            .await;

        match decision.query.as_deref() {
            Some(overridden) if Some(overridden) != query => {
                self.memory
                    .retrieve(&session.scope, &session.id, Some(overridden))
                    .await
            }
            _ => decision.bundle,
        }
    }

    fn resolve_references(&self, scope: &str, references: &[Reference]) -> Vec<String> {
        let mut resolved = Vec::new();
        for reference in references {
            let content = match reference.key.as_str() {
                "document" | "doc" => self
                    .workspace
                    .get_document(scope, &reference.id)
                    .map(|d| format!("Referenced document '{}':\n{}", d.title, d.content)),
                "todo" => self.workspace.get_todo_list(scope, &reference.id).map(|l| {
                    let items: Vec<String> = l
                        .items
                        .iter()
                        .map(|i| format!("- [{}] {}", if i.done { "x" } else { " " }, i.text))
                        .collect();
                    format!("Referenced todo list '{}':\n{}", l.title, items.join("\n"))
                }),
                other => {
                    tracing::debug!(key = other, id = %reference.id, "Unknown reference key");
                    None
                }
            };
            if let Some(content) = content {
                resolved.push(content);
            } else {
                tracing::debug!(key = %reference.key, id = %reference.id,
                    "Reference did not resolve");
            }
        }
        resolved
    }

    fn dynamic_prompt(
        &self,
        session: &AgentSession,
        memories: &MemoryBundle,
        reference_content: &[String],
    ) -> String {
        let mut sections = Vec::new();

        if self.config.reference_injection == ReferenceInjection::SystemPrompt
            && !reference_content.is_empty()
        {
            sections.push(reference_content.join("\n\n"));
        }

        if !memories.is_empty() {
            let lines: Vec<String> = memories
                .all()
                .iter()
                .map(|m| format!("- {}", m.content))
                .collect();
            sections.push(format!("Relevant memories:\n{}", lines.join("\n")));
        }

        let live_locks = self.locks.list_scope_locks(&session.scope);
        if !live_locks.is_empty() {
            let lines: Vec<String> = live_locks
                .iter()
                .map(|l| {
                    let holder = if l.session_id == session.id {
                        "held by you".to_string()
                    } else {
                        format!("held by session {}", l.session_id)
                    };
                    format!("- {} {}: {}", l.key.resource_type, l.key.resource_id, holder)
                })
                .collect();
            sections.push(format!("Currently locked resources:\n{}", lines.join("\n")));
        }

        if let Some(summary) = &session.summary {
            sections.push(format!("Conversation summary so far:\n{summary}"));
        }

        if sections.is_empty() {
            "No additional workspace context for this turn.".to_string()
        } else {
            sections.join("\n\n")
        }
    }
}

/// Session-static prompt prefix; identical across every turn of a session.
fn static_prompt(session: &AgentSession) -> String {
    let mut prompt = String::from(
        "You are Quill, a personal knowledge and workspace assistant. \
         You manage documents, todo lists, and files through tools. \
         Resources shared between sessions are guarded by locks; when a tool \
         reports a lock conflict, tell the user who holds the resource instead \
         of retrying blindly.",
    );
    match session.kind {
        SessionKind::Background => {
            if let Some(task) = &session.background_task {
                prompt.push_str(&format!(
                    "\n\nYou are running a background task: {}\nWhen the task is \
                     complete, call quill_submit_result exactly once with the final result.",
                    task.description
                ));
            }
        }
        SessionKind::Interactive | SessionKind::Tool => {}
    }
    if session.workflow_session {
        prompt.push_str(
            "\n\nThis session manages a workflow. Use quill_workflow for all \
             workflow operations.",
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::hooks::HookRegistry;
    use crate::locks::InMemoryLockStore;
    use crate::memory::NoopMemoryProvider;
    use crate::session::AgentMessage;

    fn builder(config: OrchestratorConfig) -> ContextBuilder {
        let events = EventBus::default();
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockStore::new()),
            events.clone(),
            60_000,
        ));
        ContextBuilder::new(
            Arc::new(WorkspaceStore::new(locks.clone(), events)),
            Arc::new(NoopMemoryProvider),
            locks,
            HookExecutor::new(Arc::new(HookRegistry::new())),
            Arc::new(config),
        )
    }

    #[test]
    fn parses_both_reference_forms() {
        let refs = parse_references("see @document:doc-1 and @(todo:my errands)");
        assert_eq!(
            refs,
            vec![
                Reference {
                    key: "document".to_string(),
                    id: "doc-1".to_string()
                },
                Reference {
                    key: "todo".to_string(),
                    id: "my errands".to_string()
                },
            ]
        );
    }

    #[test]
    fn duplicate_references_collapse() {
        let refs = parse_references("@doc:a @doc:a @doc:b");
        assert_eq!(refs.len(), 2);
    }

    #[tokio::test]
    async fn system_prompt_is_two_parts_with_static_prefix_first() {
        let builder = builder(OrchestratorConfig::default());
        let mut session = AgentSession::new("main");
        session
            .messages
            .push(AgentMessage::text(Role::User, "hello"));

        let messages = builder.build(&session).await;
        assert_eq!(messages[0].role, crate::session::Role::System);
        assert_eq!(messages[1].role, crate::session::Role::System);
        assert!(messages[0].content.contains("Quill"));
        // Static prefix carries no per-turn data
        assert!(!messages[0].content.contains("memories"));
        assert_eq!(messages[2].content, "hello");
    }

    #[tokio::test]
    async fn locks_overview_lands_in_dynamic_part() {
        let builder = builder(OrchestratorConfig::default());
        builder
            .locks
            .acquire_lock("main", "document", "doc-1", "other", None, None);
        let mut session = AgentSession::new("main");
        session.messages.push(AgentMessage::text(Role::User, "hi"));

        let messages = builder.build(&session).await;
        assert!(messages[1].content.contains("doc-1"));
        assert!(messages[1].content.contains("held by session other"));
    }

    #[tokio::test]
    async fn references_inline_on_user_message_when_configured() {
        let config = OrchestratorConfig {
            reference_injection: ReferenceInjection::UserMessage,
            ..OrchestratorConfig::default()
        };
        let builder = builder(config);
        // Seed a document the reference resolves to.
        let lock = builder
            .locks
            .acquire_lock("main", "document", "notes", "seed", None, None);
        builder
            .workspace
            .save_document(
                "main",
                "notes",
                Some("Notes".to_string()),
                "doc body".to_string(),
                "seed",
                lock.lock().unwrap().fence_token,
            )
            .unwrap();

        let mut session = AgentSession::new("main");
        session
            .messages
            .push(AgentMessage::text(Role::User, "summarize @document:notes"));

        let messages = builder.build(&session).await;
        let user = messages
            .iter()
            .find(|m| m.role == crate::session::Role::User)
            .unwrap();
        assert!(user.content.contains("doc body"));
        assert!(!messages[1].content.contains("doc body"));
    }

    #[tokio::test]
    async fn tool_call_history_becomes_assistant_plus_tool_messages() {
        let builder = builder(OrchestratorConfig::default());
        let mut session = AgentSession::new("main");
        session.messages.push(AgentMessage::text(Role::User, "go"));
        let mut assistant = AgentMessage::text(Role::Assistant, "working");
        assistant.parts.push(MessagePart::ToolCall {
            id: "call-1".to_string(),
            name: "quill_file".to_string(),
            arguments: "{}".to_string(),
            result: Some("file text".to_string()),
            error: false,
            status: crate::session::ToolCallStatus::Done,
            elapsed_ms: Some(3),
        });
        session.messages.push(assistant);

        let messages = builder.build(&session).await;
        let assistant_msg = messages
            .iter()
            .find(|m| m.tool_calls.is_some())
            .expect("assistant message with tool calls");
        assert_eq!(assistant_msg.tool_calls.as_ref().unwrap()[0].id, "call-1");
        let result_msg = messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call-1"))
            .expect("tool result message");
        assert_eq!(result_msg.content, "file text");
    }
}
