//! Chat orchestration: the streaming conversation loop and session
//! operations around it.
//!
//! One loop instance runs per chat invocation, never concurrently for the
//! same session. Starting a new chat cancels the previous one's token
//! before the new loop begins; two streams folding into the same message
//! list would corrupt ordering.

pub mod context;
pub mod round;
pub mod stream;

pub use context::{ContextBuilder, Reference, parse_references};
pub use round::{
    ExecutedCall, FirstCallHints, ToolStageDeps, execute_round_tools, is_transient,
    run_single_call,
};
pub use stream::{ChatEvent, ToolCallStatus, result_chunks};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use crate::hooks::HookExecutor;
use crate::interact::{InteractDetails, InteractionManager};
use crate::llm::{ChatProvider, ChatRequest, ToolCall, ToolDefinition, prompt_cache_key};
use crate::locks::LockManager;
use crate::mcp::McpClient;
use crate::memory::MemoryProvider;
use crate::permissions::PermissionManager;
use crate::search::SearchProvider;
use crate::session::{
    AgentMessage, AgentSession, Checkpoint, MessagePart, Role, SessionKind, SessionStatus,
    SessionStore, SessionUpdate, TokenUsage,
};
use crate::tools::builtin::SUBMIT_RESULT_TOOL;
use crate::tools::catalog::{CatalogOptions, assemble_tool_set};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::{ToolContext, ToolGroup};
use crate::workspace::WorkspaceStore;

/// Per-invocation chat options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// User message appended to the session before the loop starts.
    pub user_message: Option<String>,
    /// Model override; falls back to the configured default.
    pub model: Option<String>,
    /// Final allow-list intersected with the assembled tool set.
    pub allowed_tools: Option<Vec<String>>,
}

/// Everything the orchestrator is wired with.
pub struct OrchestratorDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub provider: Arc<dyn ChatProvider>,
    pub registry: Arc<ToolRegistry>,
    pub hooks: HookExecutor,
    pub permissions: Arc<PermissionManager>,
    pub locks: Arc<LockManager>,
    pub interactions: Arc<InteractionManager>,
    pub memory: Arc<dyn MemoryProvider>,
    pub mcp: Arc<dyn McpClient>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub workspace: Arc<WorkspaceStore>,
    pub events: EventBus,
    pub config: Arc<OrchestratorConfig>,
}

struct ActiveChat {
    token: CancellationToken,
    generation: u64,
}

/// The orchestration service. One long-lived instance per process; all
/// per-session state lives in maps keyed by session id.
pub struct AgentOrchestrator {
    sessions: Arc<dyn SessionStore>,
    provider: Arc<dyn ChatProvider>,
    permissions: Arc<PermissionManager>,
    locks: Arc<LockManager>,
    interactions: Arc<InteractionManager>,
    mcp: Arc<dyn McpClient>,
    search: Option<Arc<dyn SearchProvider>>,
    events: EventBus,
    config: Arc<OrchestratorConfig>,
    context: ContextBuilder,
    stage: ToolStageDeps,
    registry: Arc<ToolRegistry>,
    hints: Arc<FirstCallHints>,
    disabled_groups: RwLock<HashSet<ToolGroup>>,
    session_disabled_groups: RwLock<HashMap<String, HashSet<ToolGroup>>>,
    active: Mutex<HashMap<String, ActiveChat>>,
    generation: AtomicU64,
}

impl AgentOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let hints = Arc::new(FirstCallHints::new());
        let context = ContextBuilder::new(
            deps.workspace.clone(),
            deps.memory.clone(),
            deps.locks.clone(),
            deps.hooks.clone(),
            deps.config.clone(),
        );
        let stage = ToolStageDeps {
            registry: deps.registry.clone(),
            hooks: deps.hooks,
            mcp: deps.mcp.clone(),
            search: deps.search.clone(),
            events: deps.events.clone(),
            config: deps.config.clone(),
            hints: hints.clone(),
        };
        Self {
            sessions: deps.sessions,
            provider: deps.provider,
            permissions: deps.permissions,
            locks: deps.locks,
            interactions: deps.interactions,
            mcp: deps.mcp,
            search: deps.search,
            events: deps.events,
            config: deps.config,
            context,
            stage,
            registry: deps.registry,
            hints,
            disabled_groups: RwLock::new(HashSet::new()),
            session_disabled_groups: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Disable a tool group for every session.
    pub fn disable_group(&self, group: ToolGroup) {
        self.disabled_groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group);
    }

    /// Disable tool groups for one session only.
    pub fn set_session_disabled_groups(&self, session_id: &str, groups: HashSet<ToolGroup>) {
        self.session_disabled_groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), groups);
    }

    /// Cancel a session's in-flight chat, if any. Returns whether one was
    /// running.
    pub fn cancel_chat(&self, session_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(session_id) {
            Some(chat) => {
                chat.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start a chat turn for a session and stream its events.
    ///
    /// Any chat already in flight for the session is cancelled first. The
    /// session's status goes `Chatting` and is guaranteed to return to
    /// `Idle` on every exit path of the spawned loop.
    pub async fn chat(
        self: &Arc<Self>,
        session_id: &str,
        options: ChatOptions,
    ) -> Result<ReceiverStream<ChatEvent>, Error> {
        self.sessions.get_session(session_id).await?;
        if let Some(text) = &options.user_message {
            self.sessions
                .append_message(session_id, AgentMessage::text(Role::User, text.clone()))
                .await?;
        }
        self.sessions
            .update_session(
                session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Chatting),
                    ..SessionUpdate::default()
                },
            )
            .await?;

        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = active.insert(
                session_id.to_string(),
                ActiveChat {
                    token: token.clone(),
                    generation,
                },
            ) {
                previous.token.cancel();
            }
        }

        let (tx, rx) = mpsc::channel(64);
        let this = Arc::clone(self);
        let id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.run_loop(&id, &options, &token, &tx).await {
                tracing::error!(session_id = %id, "Chat turn failed: {}", e);
                let _ = tx
                    .send(ChatEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
            // Only this run's own entry may be removed, and only the
            // current run may reset the status; a superseding chat has
            // already replaced the entry under a newer generation.
            let still_current = {
                let mut active = this.active.lock().unwrap_or_else(|e| e.into_inner());
                if active.get(&id).is_some_and(|c| c.generation == generation) {
                    active.remove(&id);
                    true
                } else {
                    false
                }
            };
            if still_current {
                if let Err(e) = this
                    .sessions
                    .update_session(
                        &id,
                        SessionUpdate {
                            status: Some(SessionStatus::Idle),
                            ..SessionUpdate::default()
                        },
                    )
                    .await
                {
                    tracing::warn!(session_id = %id, "Failed to reset session status: {}", e);
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_loop(
        &self,
        session_id: &str,
        options: &ChatOptions,
        token: &CancellationToken,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), Error> {
        let mut usage = TokenUsage::default();

        'rounds: loop {
            if token.is_cancelled() {
                break 'rounds;
            }
            let session = self.sessions.get_session(session_id).await?;
            let mut granted = session.granted_paths.clone();
            let messages = self.context.build(&session).await;
            let tools = self.assemble_tools(&session, options).await;
            let model = options
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone());
            let request = ChatRequest::new(messages, model.clone())
                .with_temperature(self.config.temperature)
                .with_tools(tools.clone())
                .with_prompt_cache_key(prompt_cache_key(&session.scope, &tools));

            let mut stream = self.provider.chat_stream(request).await?;
            let mut text = String::new();
            let mut announced: HashSet<String> = HashSet::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut completed = false;

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;

                if let Some(delta) = chunk.text {
                    text.push_str(&delta);
                    let _ = tx.send(ChatEvent::TextDelta { text: delta }).await;
                }
                if let Some(delta) = chunk.reasoning {
                    let _ = tx.send(ChatEvent::ReasoningDelta { text: delta }).await;
                }
                if let Some((call_id, name)) = chunk.tool_call_preparing {
                    // A given id is announced once no matter how often the
                    // provider repeats the signal.
                    if announced.insert(call_id.clone()) {
                        let _ = tx
                            .send(ChatEvent::ToolStatus {
                                tool_call_id: call_id,
                                tool_name: name,
                                status: ToolCallStatus::Preparing,
                            })
                            .await;
                    }
                }
                if let Some(chunk_usage) = chunk.usage {
                    usage.add(chunk_usage);
                }
                if chunk.done {
                    calls = chunk.tool_calls.unwrap_or_default();
                    completed = true;
                    break;
                }
            }

            if !completed {
                // Cancelled (or truncated) mid-stream: partial content is
                // never silently discarded.
                if !text.is_empty() {
                    let mut message = AgentMessage::text(Role::Assistant, text);
                    message.model = Some(model);
                    self.sessions.append_message(session_id, message).await?;
                }
                break 'rounds;
            }

            if calls.is_empty() {
                let mut message = AgentMessage::text(Role::Assistant, text);
                message.model = Some(model);
                message.usage = Some(usage);
                self.sessions.append_message(session_id, message).await?;
                let _ = tx.send(ChatEvent::Done { usage }).await;
                return Ok(());
            }

            for call in &calls {
                if announced.insert(call.id.clone()) {
                    let _ = tx
                        .send(ChatEvent::ToolStatus {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            status: ToolCallStatus::Preparing,
                        })
                        .await;
                }
            }
            // Fixed delay so clients render a preparing frame before the
            // running transition arrives.
            tokio::time::sleep(self.config.preparing_delay).await;
            for call in &calls {
                let _ = tx
                    .send(ChatEvent::ToolStatus {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        status: ToolCallStatus::Running,
                    })
                    .await;
            }

            let mut ctx = ToolContext::new(session_id, &session.scope);
            if let Some(task) = session.background_task.clone() {
                ctx = ctx.with_background_task(task);
            }
            let mut executed =
                execute_round_tools(&self.stage, &ctx, &granted, calls, tx).await;

            // Interaction blocking, sequential. Cancellation stops creating
            // new requests; already-answered calls keep their outcome.
            for index in 0..executed.len() {
                let Some(details) = executed[index].pending_interaction.clone() else {
                    continue;
                };
                if token.is_cancelled() {
                    break;
                }
                let call_id = executed[index].call.id.clone();
                let call_name = executed[index].call.name.clone();
                let uncovered: Vec<String> = details
                    .paths()
                    .iter()
                    .filter(|p| !granted.contains(*p))
                    .cloned()
                    .collect();
                let already_covered =
                    matches!(details, InteractDetails::FileAccess { .. }) && uncovered.is_empty();

                let approved = if already_covered {
                    // Granted by an earlier interaction in this same batch.
                    true
                } else {
                    let _ = tx
                        .send(ChatEvent::ToolStatus {
                            tool_call_id: call_id.clone(),
                            tool_name: call_name.clone(),
                            status: ToolCallStatus::AwaitingInteract,
                        })
                        .await;
                    let ask_details = match &details {
                        InteractDetails::FileAccess { .. } => InteractDetails::FileAccess {
                            paths: uncovered,
                        },
                        other => other.clone(),
                    };
                    let (request, receiver) = self
                        .interactions
                        .create_request(session_id, &session.scope, &call_id, &call_name, ask_details)
                        .await;
                    let _ = tx.send(ChatEvent::InteractRequest { request }).await;

                    let response = tokio::select! {
                        _ = token.cancelled() => None,
                        response = receiver => response.ok(),
                    };
                    match response {
                        Some(response) if response.approved => {
                            if !response.granted_paths.is_empty() {
                                for path in &response.granted_paths {
                                    if !granted.contains(path) {
                                        granted.push(path.clone());
                                    }
                                }
                                self.sessions
                                    .update_session(
                                        session_id,
                                        SessionUpdate {
                                            add_granted_paths: response.granted_paths,
                                            ..SessionUpdate::default()
                                        },
                                    )
                                    .await?;
                            }
                            true
                        }
                        _ => false,
                    }
                };

                if approved {
                    let _ = tx
                        .send(ChatEvent::ToolStatus {
                            tool_call_id: call_id.clone(),
                            tool_name: call_name.clone(),
                            status: ToolCallStatus::Running,
                        })
                        .await;
                    let args = executed[index]
                        .final_arguments
                        .clone()
                        .unwrap_or(serde_json::Value::Null);
                    let (result, error, elapsed_ms) =
                        run_single_call(&self.stage, &ctx, &call_id, &call_name, args, tx).await;
                    executed[index].result = result;
                    executed[index].error = error;
                    executed[index].elapsed_ms = elapsed_ms;
                }
                // On rejection the original denial text stands.
                executed[index].pending_interaction = None;
            }

            // Fold the round: one assistant message carrying the text and
            // every tool call with its result, in original call order.
            let mut parts: Vec<MessagePart> = Vec::new();
            if !text.is_empty() {
                parts.push(MessagePart::Text { text });
            }
            for exec in &executed {
                parts.push(MessagePart::ToolCall {
                    id: exec.call.id.clone(),
                    name: exec.call.name.clone(),
                    arguments: exec.call.arguments.clone(),
                    result: Some(exec.result.clone()),
                    error: exec.error,
                    status: ToolCallStatus::Done,
                    elapsed_ms: Some(exec.elapsed_ms),
                });
            }
            let message = AgentMessage {
                id: Uuid::new_v4().to_string(),
                role: Role::Assistant,
                parts,
                created_at: Utc::now(),
                model: Some(model.clone()),
                usage: Some(usage),
            };
            self.sessions.append_message(session_id, message).await?;

            for exec in &executed {
                if exec.result.len() > self.config.tool_result_chunk_size {
                    let chunks =
                        result_chunks(&exec.result, self.config.tool_result_chunk_size);
                    let last_index = chunks.len() - 1;
                    for (i, chunk) in chunks.into_iter().enumerate() {
                        let _ = tx
                            .send(ChatEvent::ToolResultChunk {
                                tool_call_id: exec.call.id.clone(),
                                chunk,
                                last: i == last_index,
                            })
                            .await;
                    }
                }
                let _ = tx
                    .send(ChatEvent::ToolStatus {
                        tool_call_id: exec.call.id.clone(),
                        tool_name: exec.call.name.clone(),
                        status: ToolCallStatus::Done,
                    })
                    .await;
            }

            // A successful result submission ends a background session's
            // loop in the same round; the model does not get to keep going.
            if session.kind == SessionKind::Background
                && executed
                    .iter()
                    .any(|e| e.call.name == SUBMIT_RESULT_TOOL && !e.error)
            {
                let _ = tx.send(ChatEvent::Done { usage }).await;
                return Ok(());
            }
        }

        // Cancelled exit still terminates the protocol with a single done.
        let _ = tx.send(ChatEvent::Done { usage }).await;
        Ok(())
    }

    async fn assemble_tools(
        &self,
        session: &AgentSession,
        options: &ChatOptions,
    ) -> Vec<ToolDefinition> {
        let mcp_tools = match self.mcp.list_all_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!("Failed to list MCP tools: {}", e);
                Vec::new()
            }
        };
        let web_search_tools = if self.config.web_search_enabled {
            self.search
                .as_ref()
                .map(|s| s.tool_definitions())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let disabled = self
            .disabled_groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let session_disabled = self
            .session_disabled_groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session.id)
            .cloned();
        assemble_tool_set(
            &self.registry,
            CatalogOptions {
                session,
                disabled_groups: &disabled,
                session_disabled_groups: session_disabled.as_ref(),
                mcp_tools,
                web_search_tools,
                allowed_tools: options.allowed_tools.as_deref(),
            },
        )
    }

    /// Create a session in the store.
    pub async fn create_session(&self, session: AgentSession) -> Result<AgentSession, Error> {
        self.sessions.create_session(session.clone()).await?;
        Ok(session)
    }

    /// Delete a session. Cancels any in-flight chat and pending
    /// interactions, then emits the deletion event so subscribers release
    /// locks and clear per-session state.
    pub async fn delete_session(&self, session_id: &str) -> Result<AgentSession, Error> {
        self.cancel_chat(session_id);
        self.interactions.cancel_session(session_id).await;
        let session = self.sessions.delete_session(session_id).await?;
        self.events.emit(DomainEvent::SessionDeleted {
            session_id: session.id.clone(),
            scope: session.scope.clone(),
        });
        Ok(session)
    }

    /// Record a checkpoint at the session's current message boundary.
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        label: impl Into<String>,
    ) -> Result<Checkpoint, Error> {
        let session = self.sessions.get_session(session_id).await?;
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            message_index: session.messages.len().saturating_sub(1),
            created_at: Utc::now(),
        };
        self.sessions
            .update_session(
                session_id,
                SessionUpdate {
                    push_checkpoint: Some(checkpoint.clone()),
                    ..SessionUpdate::default()
                },
            )
            .await?;
        Ok(checkpoint)
    }

    /// Truncate the session's history back to a checkpoint. Returns the
    /// number of messages removed.
    pub async fn rollback_to_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<usize, Error> {
        let session = self.sessions.get_session(session_id).await?;
        let checkpoint = session
            .checkpoints
            .iter()
            .find(|c| c.id == checkpoint_id)
            .ok_or_else(|| crate::error::SessionError::CheckpointNotFound {
                session_id: session_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            })?;
        let keep = checkpoint.message_index + 1;
        let removed = self.sessions.truncate_messages(session_id, keep).await?;
        self.events.emit(DomainEvent::SessionRolledBack {
            session_id: session_id.to_string(),
            scope: session.scope.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            truncated_from: keep,
        });
        Ok(removed)
    }

    /// Copy a session under a new id.
    pub async fn fork_session(&self, session_id: &str) -> Result<AgentSession, Error> {
        Ok(self.sessions.fork_session(session_id).await?)
    }

    /// Wire the cleanup subscribers: on session deletion, permission state,
    /// locks, first-call hints, and pending interactions for that session
    /// all go away.
    pub fn spawn_cleanup_subscribers(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        let permissions = self.permissions.clone();
        let locks = self.locks.clone();
        let hints = self.hints.clone();
        let interactions = self.interactions.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(DomainEvent::SessionDeleted { session_id, scope }) => {
                        permissions.clear_session(&session_id);
                        let released = locks.release_session_locks(&scope, &session_id);
                        hints.clear_session(&session_id);
                        interactions.cancel_session(&session_id).await;
                        tracing::debug!(
                            %session_id,
                            released,
                            "Cleaned up deleted session"
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Cleanup subscriber lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
