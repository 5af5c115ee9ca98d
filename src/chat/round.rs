//! Per-round tool execution stage.
//!
//! Calls execute concurrently but their results are slotted back and
//! reported in the original call order; concurrency affects latency only.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::chat::stream::ChatEvent;
use crate::config::OrchestratorConfig;
use crate::error::ToolError;
use crate::events::{DomainEvent, EventBus};
use crate::hooks::{HookDecision, HookExecutor, PostToolUsePayload, PreToolUsePayload};
use crate::interact::InteractDetails;
use crate::llm::ToolCall;
use crate::mcp::McpClient;
use crate::search::{SearchProvider, is_search_tool};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::{ToolContext, ToolGroup};

/// Substrings identifying transient network failures worth one retry.
const TRANSIENT_PATTERNS: &[&str] = &[
    "econnreset",
    "etimedout",
    "econnrefused",
    "epipe",
    "socket hang up",
    "connection reset",
    "connection refused",
    "timed out",
    "timeout",
];

/// Whether an execution failure looks like a transient network error.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// How many characters of a malformed argument string survive into the
/// error result.
const MALFORMED_PREVIEW_LEN: usize = 120;

fn truncated_preview(raw: &str) -> String {
    if raw.len() <= MALFORMED_PREVIEW_LEN {
        raw.to_string()
    } else {
        let mut end = MALFORMED_PREVIEW_LEN;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    }
}

/// Tracks which guarded tool categories a session has already used, so the
/// first call in each category gets a usage hint appended exactly once.
#[derive(Default)]
pub struct FirstCallHints {
    seen: Mutex<HashMap<String, HashSet<ToolGroup>>>,
}

impl FirstCallHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hint to append, or `None` if this category was already hinted
    /// for the session (or has no hint).
    pub fn take_hint(&self, session_id: &str, group: ToolGroup) -> Option<&'static str> {
        let hint = hint_text(group)?;
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let groups = seen.entry(session_id.to_string()).or_default();
        groups.insert(group).then_some(hint)
    }

    pub fn clear_session(&self, session_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }
}

fn hint_text(group: ToolGroup) -> Option<&'static str> {
    match group {
        ToolGroup::Terminal => Some(
            "Note: terminal commands run with a timeout and their full output is \
             captured. Prefer short, targeted commands.",
        ),
        ToolGroup::Workspace | ToolGroup::Files => Some(
            "Note: workspace writes go through resource locks. If a save reports \
             a conflict, another session holds the resource.",
        ),
        ToolGroup::Locks => Some(
            "Note: locks expire when not heartbeated. Release locks you no longer \
             need so other sessions can proceed.",
        ),
        ToolGroup::Workflow => Some(
            "Note: workflow operations are asynchronous. Check status before \
             assuming a step completed.",
        ),
        ToolGroup::WebSearch => Some(
            "Note: web results may be stale or wrong. Cross-check anything \
             important before acting on it.",
        ),
        ToolGroup::Navigation | ToolGroup::Results => None,
    }
}

/// Shared dependencies of the execution stage.
#[derive(Clone)]
pub struct ToolStageDeps {
    pub registry: Arc<ToolRegistry>,
    pub hooks: HookExecutor,
    pub mcp: Arc<dyn McpClient>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub events: EventBus,
    pub config: Arc<OrchestratorConfig>,
    pub hints: Arc<FirstCallHints>,
}

/// Outcome of one call after the execution stage.
#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub call: ToolCall,
    pub result: String,
    pub error: bool,
    pub elapsed_ms: u64,
    /// Present when the call is suspended on human approval; the result
    /// holds the denial text that stands if the human rejects.
    pub pending_interaction: Option<InteractDetails>,
    /// Parsed arguments after hook mutations, for the approval retry.
    pub final_arguments: Option<serde_json::Value>,
}

/// Run every accumulated tool call of one round.
///
/// Pre-hooks run sequentially in the original order; executable calls then
/// fan out concurrently and results are slotted back by index.
pub async fn execute_round_tools(
    deps: &ToolStageDeps,
    ctx: &ToolContext,
    granted_paths: &[String],
    calls: Vec<ToolCall>,
    events_tx: &mpsc::Sender<ChatEvent>,
) -> Vec<ExecutedCall> {
    enum Plan {
        Execute(serde_json::Value),
        Finished,
    }

    let mut executed: Vec<ExecutedCall> = Vec::with_capacity(calls.len());
    let mut plans: Vec<Plan> = Vec::with_capacity(calls.len());
    let mut pre_contexts: Vec<Option<String>> = Vec::with_capacity(calls.len());

    for call in calls {
        let parsed: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                let preview = truncated_preview(&call.arguments);
                executed.push(ExecutedCall {
                    call,
                    result: format!("Invalid tool arguments ({e}): {preview}"),
                    error: true,
                    elapsed_ms: 0,
                    pending_interaction: None,
                    final_arguments: None,
                });
                plans.push(Plan::Finished);
                pre_contexts.push(None);
                continue;
            }
        };

        let decision = deps
            .hooks
            .pre_tool_use(&PreToolUsePayload {
                session_id: ctx.session_id.clone(),
                scope: ctx.scope.clone(),
                tool_name: call.name.clone(),
                arguments: parsed.clone(),
                granted_paths: granted_paths.to_vec(),
            })
            .await;
        let final_args = decision.updated_arguments.unwrap_or(parsed);
        pre_contexts.push(decision.additional_context.clone());

        match decision.decision {
            HookDecision::Deny => {
                let message = decision
                    .deny_message
                    .unwrap_or_else(|| format!("{} is not permitted", call.name));
                executed.push(ExecutedCall {
                    call,
                    result: message,
                    error: true,
                    elapsed_ms: 0,
                    pending_interaction: None,
                    final_arguments: Some(final_args),
                });
                plans.push(Plan::Finished);
            }
            HookDecision::Ask => {
                let details = decision.interact_details.unwrap_or_else(|| {
                    InteractDetails::Custom {
                        description: format!("Approve {}?", call.name),
                    }
                });
                let uncovered: Vec<&String> = details
                    .paths()
                    .iter()
                    .filter(|p| !granted_paths.contains(*p))
                    .collect();
                // A path-based ask whose every path is already granted
                // proceeds without re-asking.
                if matches!(details, InteractDetails::FileAccess { .. }) && uncovered.is_empty() {
                    executed.push(ExecutedCall {
                        call,
                        result: String::new(),
                        error: false,
                        elapsed_ms: 0,
                        pending_interaction: None,
                        final_arguments: Some(final_args.clone()),
                    });
                    plans.push(Plan::Execute(final_args));
                } else {
                    executed.push(ExecutedCall {
                        call: call.clone(),
                        result: format!("User approval required for {}", call.name),
                        error: true,
                        elapsed_ms: 0,
                        pending_interaction: Some(details),
                        final_arguments: Some(final_args),
                    });
                    plans.push(Plan::Finished);
                }
            }
            HookDecision::Allow => {
                executed.push(ExecutedCall {
                    call,
                    result: String::new(),
                    error: false,
                    elapsed_ms: 0,
                    pending_interaction: None,
                    final_arguments: Some(final_args.clone()),
                });
                plans.push(Plan::Execute(final_args));
            }
        }
    }

    // Fan out the executable calls; slot results back by original index.
    let mut join_set: JoinSet<(usize, String, bool, u64)> = JoinSet::new();
    for (index, plan) in plans.iter().enumerate() {
        if let Plan::Execute(args) = plan {
            let deps = deps.clone();
            let ctx = ctx.clone();
            let name = executed[index].call.name.clone();
            let call_id = executed[index].call.id.clone();
            let args = args.clone();
            let events_tx = events_tx.clone();
            join_set.spawn(async move {
                let (result, error, elapsed_ms) =
                    run_single_call(&deps, &ctx, &call_id, &name, args, &events_tx).await;
                (index, result, error, elapsed_ms)
            });
        }
    }
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result, error, elapsed_ms)) => {
                executed[index].result = result;
                executed[index].error = error;
                executed[index].elapsed_ms = elapsed_ms;
            }
            Err(e) => {
                tracing::error!("Tool execution task panicked: {}", e);
            }
        }
    }

    // Context supplied by pre-hooks rides along with the executed result.
    for (index, context) in pre_contexts.into_iter().enumerate() {
        if let (Some(context), Plan::Execute(_)) = (context, &plans[index]) {
            if !executed[index].error {
                executed[index].result.push('\n');
                executed[index].result.push_str(&context);
            }
        }
    }

    executed
}

/// Execute one tool call end to end: dispatch with heartbeat and a single
/// transient retry, then post-hooks, first-call hint, and the executed
/// domain event. Also used for the approval-retry path.
pub async fn run_single_call(
    deps: &ToolStageDeps,
    ctx: &ToolContext,
    tool_call_id: &str,
    tool_name: &str,
    args: serde_json::Value,
    events_tx: &mpsc::Sender<ChatEvent>,
) -> (String, bool, u64) {
    let start = Instant::now();
    let outcome = dispatch_with_heartbeat(deps, ctx, tool_call_id, tool_name, args.clone(), events_tx).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let (mut result, error) = match outcome {
        Ok(text) => (text, false),
        Err(e) => (e.to_string(), true),
    };

    let post = deps
        .hooks
        .post_tool_use(&PostToolUsePayload {
            session_id: ctx.session_id.clone(),
            scope: ctx.scope.clone(),
            tool_name: tool_name.to_string(),
            arguments: args,
            result: result.clone(),
            error,
        })
        .await;
    result = post.result;
    if let Some(context) = post.additional_context {
        result.push('\n');
        result.push_str(&context);
    }

    if !error {
        let group = deps
            .registry
            .get(tool_name)
            .map(|t| t.group())
            .or_else(|| is_search_tool(tool_name).then_some(ToolGroup::WebSearch));
        if let Some(group) = group {
            if let Some(hint) = deps.hints.take_hint(&ctx.session_id, group) {
                result.push('\n');
                result.push_str(hint);
            }
        }
    }

    deps.events.emit(DomainEvent::ToolExecuted {
        session_id: ctx.session_id.clone(),
        scope: ctx.scope.clone(),
        tool_name: tool_name.to_string(),
        error,
        elapsed_ms,
    });

    (result, error, elapsed_ms)
}

/// Dispatch with a still-running heartbeat and one retry on a transient
/// network failure.
async fn dispatch_with_heartbeat(
    deps: &ToolStageDeps,
    ctx: &ToolContext,
    tool_call_id: &str,
    tool_name: &str,
    args: serde_json::Value,
    events_tx: &mpsc::Sender<ChatEvent>,
) -> Result<String, ToolError> {
    let started = Instant::now();
    let execution = async {
        match dispatch(deps, ctx, tool_name, args.clone()).await {
            Err(e) if is_transient(&e.to_string()) => {
                tracing::warn!(tool = %tool_name, "Transient tool failure, retrying once: {}", e);
                tokio::time::sleep(deps.config.transient_retry_backoff).await;
                dispatch(deps, ctx, tool_name, args).await
            }
            other => other,
        }
    };
    tokio::pin!(execution);

    loop {
        tokio::select! {
            result = &mut execution => return result,
            _ = tokio::time::sleep(deps.config.tool_heartbeat_threshold) => {
                let _ = events_tx
                    .send(ChatEvent::ToolProgress {
                        tool_call_id: tool_call_id.to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
            }
        }
    }
}

/// Route a call to its backend: builtin registry first, then the search
/// provider, then MCP by full name.
async fn dispatch(
    deps: &ToolStageDeps,
    ctx: &ToolContext,
    tool_name: &str,
    args: serde_json::Value,
) -> Result<String, ToolError> {
    if let Some(tool) = deps.registry.get(tool_name) {
        return tool.execute(args, ctx).await;
    }
    if is_search_tool(tool_name) {
        if let Some(search) = &deps.search {
            return search.execute(tool_name, args).await;
        }
    }
    deps.mcp.call_tool(tool_name, args).await
}
