//! Per-event chain execution with fixed fold semantics.
//!
//! Chains run sequentially in ascending priority order, never in parallel:
//! each hook may depend on the previous one's mutated arguments or result.

use std::sync::Arc;

use serde_json::Value;

use super::hook::{
    HookDecision, HookKind, PostMemoryExtractPayload, PostToolUsePayload, PreMemoryInjectPayload,
    PreToolUsePayload,
};
use super::registry::HookRegistry;
use crate::interact::InteractDetails;
use crate::memory::MemoryBundle;

/// Folded decision of a PreToolUse chain.
#[derive(Debug, Clone)]
pub struct PreToolUseDecision {
    pub decision: HookDecision,
    pub deny_message: Option<String>,
    /// The FIRST asking hook's details; later asks never overwrite them.
    pub interact_details: Option<InteractDetails>,
    /// Final arguments, present only when some hook changed them.
    pub updated_arguments: Option<Value>,
    /// Newline-joined context strings from every hook that supplied one.
    pub additional_context: Option<String>,
}

impl PreToolUseDecision {
    fn allow() -> Self {
        Self {
            decision: HookDecision::Allow,
            deny_message: None,
            interact_details: None,
            updated_arguments: None,
            additional_context: None,
        }
    }
}

/// Folded result of a PostToolUse chain.
#[derive(Debug, Clone)]
pub struct PostToolUseDecision {
    /// Result text after every rewrite in the chain.
    pub result: String,
    pub additional_context: Option<String>,
}

/// Folded result of a PreMemoryInject chain.
#[derive(Debug, Clone)]
pub struct MemoryInjectDecision {
    pub bundle: MemoryBundle,
    pub query: Option<String>,
}

/// Folded result of a PostMemoryExtract chain.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtractDecision {
    /// De-duplicated union of excluded ids, first occurrence order.
    pub exclude_ids: Vec<String>,
}

/// Runs the matching chain for one event.
#[derive(Clone)]
pub struct HookExecutor {
    registry: Arc<HookRegistry>,
}

impl HookExecutor {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Fold the PreToolUse chain.
    ///
    /// Deny short-circuits: once observed, later hooks are never invoked.
    /// Ask downgrades monotonically (any ask beats a later allow) and keeps
    /// only the first ask's interaction details. Argument mutations thread
    /// forward into subsequent hooks.
    pub async fn pre_tool_use(&self, payload: &PreToolUsePayload) -> PreToolUseDecision {
        let hooks = self
            .registry
            .matching(HookKind::PreToolUse, Some(&payload.tool_name));

        let mut decision = PreToolUseDecision::allow();
        let mut current_args = payload.arguments.clone();
        let mut args_changed = false;
        let mut contexts: Vec<String> = Vec::new();

        for hook in hooks {
            let hook_payload = PreToolUsePayload {
                arguments: current_args.clone(),
                ..payload.clone()
            };
            let outcome = match hook.handler.pre_tool_use(&hook_payload).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(hook = %hook.id, tool = %payload.tool_name,
                        "PreToolUse hook failed, continuing: {}", e);
                    continue;
                }
            };

            if let Some(updated) = outcome.updated_arguments {
                if updated != current_args {
                    current_args = updated;
                    args_changed = true;
                }
            }
            if let Some(context) = outcome.additional_context {
                contexts.push(context);
            }

            match outcome.decision {
                HookDecision::Deny => {
                    decision.decision = HookDecision::Deny;
                    decision.deny_message = outcome.deny_message;
                    decision.updated_arguments = args_changed.then(|| current_args);
                    decision.additional_context = join_contexts(contexts);
                    return decision;
                }
                HookDecision::Ask => {
                    decision.decision = HookDecision::Ask;
                    if decision.interact_details.is_none() {
                        decision.interact_details = outcome.interact_details;
                    }
                }
                HookDecision::Allow => {}
            }
        }

        decision.updated_arguments = args_changed.then_some(current_args);
        decision.additional_context = join_contexts(contexts);
        decision
    }

    /// Fold the PostToolUse chain: sequential result rewrites, concatenated
    /// contexts, no deny concept.
    pub async fn post_tool_use(&self, payload: &PostToolUsePayload) -> PostToolUseDecision {
        let hooks = self
            .registry
            .matching(HookKind::PostToolUse, Some(&payload.tool_name));

        let mut result = payload.result.clone();
        let mut contexts: Vec<String> = Vec::new();

        for hook in hooks {
            let hook_payload = PostToolUsePayload {
                result: result.clone(),
                ..payload.clone()
            };
            match hook.handler.post_tool_use(&hook_payload).await {
                Ok(outcome) => {
                    if let Some(rewritten) = outcome.replace_result {
                        result = rewritten;
                    }
                    if let Some(context) = outcome.additional_context {
                        contexts.push(context);
                    }
                }
                Err(e) => {
                    tracing::warn!(hook = %hook.id, tool = %payload.tool_name,
                        "PostToolUse hook failed, continuing: {}", e);
                }
            }
        }

        PostToolUseDecision {
            result,
            additional_context: join_contexts(contexts),
        }
    }

    /// Fold the PreMemoryInject chain: bundle replacements are visible to
    /// later hooks; the LAST query override wins.
    pub async fn pre_memory_inject(&self, payload: &PreMemoryInjectPayload) -> MemoryInjectDecision {
        let hooks = self.registry.matching(HookKind::PreMemoryInject, None);

        let mut bundle = payload.bundle.clone();
        let mut query = payload.query.clone();

        for hook in hooks {
            let hook_payload = PreMemoryInjectPayload {
                bundle: bundle.clone(),
                query: query.clone(),
                ..payload.clone()
            };
            match hook.handler.pre_memory_inject(&hook_payload).await {
                Ok(outcome) => {
                    if let Some(replaced) = outcome.replace_bundle {
                        bundle = replaced;
                    }
                    if let Some(overridden) = outcome.override_query {
                        query = Some(overridden);
                    }
                }
                Err(e) => {
                    tracing::warn!(hook = %hook.id,
                        "PreMemoryInject hook failed, continuing: {}", e);
                }
            }
        }

        MemoryInjectDecision { bundle, query }
    }

    /// Fold the PostMemoryExtract chain: de-duplicated union of excluded
    /// ids; no early exit.
    pub async fn post_memory_extract(
        &self,
        payload: &PostMemoryExtractPayload,
    ) -> MemoryExtractDecision {
        let hooks = self.registry.matching(HookKind::PostMemoryExtract, None);

        let mut exclude_ids: Vec<String> = Vec::new();
        for hook in hooks {
            match hook.handler.post_memory_extract(payload).await {
                Ok(outcome) => {
                    for id in outcome.exclude_ids {
                        if !exclude_ids.contains(&id) {
                            exclude_ids.push(id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(hook = %hook.id,
                        "PostMemoryExtract hook failed, continuing: {}", e);
                }
            }
        }

        MemoryExtractDecision { exclude_ids }
    }
}

fn join_contexts(contexts: Vec<String>) -> Option<String> {
    if contexts.is_empty() {
        None
    } else {
        Some(contexts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::hooks::hook::{
        HookError, HookHandler, HookRegistration, PostMemoryExtractOutcome, PostToolUseOutcome,
        PreMemoryInjectOutcome, PreToolUseOutcome,
    };
    use crate::memory::MemoryItem;

    /// Scriptable handler that records invocations.
    struct Scripted {
        outcome: PreToolUseOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HookHandler for Scripted {
        async fn pre_tool_use(
            &self,
            _payload: &PreToolUsePayload,
        ) -> Result<PreToolUseOutcome, HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
    }

    fn executor() -> (HookExecutor, Arc<HookRegistry>) {
        let registry = Arc::new(HookRegistry::new());
        (HookExecutor::new(registry.clone()), registry)
    }

    fn register_scripted(
        registry: &HookRegistry,
        id: &str,
        priority: i32,
        outcome: PreToolUseOutcome,
    ) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(HookRegistration::new(
            id,
            HookKind::PreToolUse,
            priority,
            Arc::new(Scripted {
                outcome,
                calls: calls.clone(),
            }),
        ));
        calls
    }

    fn payload(tool: &str, args: serde_json::Value) -> PreToolUsePayload {
        PreToolUsePayload {
            session_id: "s1".to_string(),
            scope: "main".to_string(),
            tool_name: tool.to_string(),
            arguments: args,
            granted_paths: vec![],
        }
    }

    #[tokio::test]
    async fn deny_short_circuits_later_hooks() {
        let (executor, registry) = executor();
        let first = register_scripted(&registry, "allow", 10, PreToolUseOutcome::allow());
        let denier = register_scripted(&registry, "deny", 20, PreToolUseOutcome::deny("no"));
        let after = register_scripted(&registry, "never", 30, PreToolUseOutcome::allow());

        let decision = executor.pre_tool_use(&payload("quill_file", json!({}))).await;
        assert_eq!(decision.decision, HookDecision::Deny);
        assert_eq!(decision.deny_message.as_deref(), Some("no"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(denier.load(Ordering::SeqCst), 1);
        assert_eq!(
            after.load(Ordering::SeqCst),
            0,
            "hooks after a deny must never be invoked"
        );
    }

    #[tokio::test]
    async fn first_ask_details_win_but_ask_still_beats_allow() {
        let (executor, registry) = executor();
        register_scripted(
            &registry,
            "ask-first",
            10,
            PreToolUseOutcome::ask(InteractDetails::Custom {
                description: "first".to_string(),
            }),
        );
        register_scripted(
            &registry,
            "ask-second",
            20,
            PreToolUseOutcome::ask(InteractDetails::Custom {
                description: "second".to_string(),
            }),
        );
        register_scripted(&registry, "allow-late", 30, PreToolUseOutcome::allow());

        let decision = executor.pre_tool_use(&payload("quill_file", json!({}))).await;
        assert_eq!(decision.decision, HookDecision::Ask);
        assert_eq!(
            decision.interact_details,
            Some(InteractDetails::Custom {
                description: "first".to_string()
            })
        );
    }

    #[tokio::test]
    async fn ask_details_follow_priority_not_registration_order() {
        let (executor, registry) = executor();
        // Registered second, but lower priority number runs first.
        register_scripted(
            &registry,
            "late-registered-high-priority",
            5,
            PreToolUseOutcome::ask(InteractDetails::Custom {
                description: "wins".to_string(),
            }),
        );
        register_scripted(
            &registry,
            "early-registered",
            50,
            PreToolUseOutcome::ask(InteractDetails::Custom {
                description: "loses".to_string(),
            }),
        );

        let decision = executor.pre_tool_use(&payload("quill_file", json!({}))).await;
        assert_eq!(
            decision.interact_details,
            Some(InteractDetails::Custom {
                description: "wins".to_string()
            })
        );
    }

    /// Handler that rewrites the `path` argument.
    struct Rewriter {
        new_path: &'static str,
        saw_path: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl HookHandler for Rewriter {
        async fn pre_tool_use(
            &self,
            payload: &PreToolUsePayload,
        ) -> Result<PreToolUseOutcome, HookError> {
            *self.saw_path.lock().unwrap() = payload
                .arguments
                .get("path")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let mut args = payload.arguments.clone();
            args["path"] = json!(self.new_path);
            Ok(PreToolUseOutcome {
                updated_arguments: Some(args),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn argument_mutations_thread_forward() {
        let (executor, registry) = executor();
        let first_saw = Arc::new(std::sync::Mutex::new(None));
        let second_saw = Arc::new(std::sync::Mutex::new(None));
        registry.register(HookRegistration::new(
            "rewrite-1",
            HookKind::PreToolUse,
            10,
            Arc::new(Rewriter {
                new_path: "/rewritten",
                saw_path: first_saw.clone(),
            }),
        ));
        registry.register(HookRegistration::new(
            "rewrite-2",
            HookKind::PreToolUse,
            20,
            Arc::new(Rewriter {
                new_path: "/final",
                saw_path: second_saw.clone(),
            }),
        ));

        let decision = executor
            .pre_tool_use(&payload("quill_file", json!({"path": "/original"})))
            .await;

        assert_eq!(first_saw.lock().unwrap().as_deref(), Some("/original"));
        assert_eq!(
            second_saw.lock().unwrap().as_deref(),
            Some("/rewritten"),
            "second hook must see the first hook's mutation"
        );
        assert_eq!(
            decision.updated_arguments,
            Some(json!({"path": "/final"})),
            "final decision reports the last mutation"
        );
    }

    #[tokio::test]
    async fn unchanged_arguments_are_not_reported() {
        let (executor, registry) = executor();
        register_scripted(&registry, "a", 10, PreToolUseOutcome::allow());
        let decision = executor
            .pre_tool_use(&payload("quill_file", json!({"path": "/x"})))
            .await;
        assert!(decision.updated_arguments.is_none());
    }

    struct Contextual(&'static str);

    #[async_trait]
    impl HookHandler for Contextual {
        async fn pre_tool_use(
            &self,
            _payload: &PreToolUsePayload,
        ) -> Result<PreToolUseOutcome, HookError> {
            Ok(PreToolUseOutcome {
                additional_context: Some(self.0.to_string()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn contexts_concatenate_in_call_order() {
        let (executor, registry) = executor();
        registry.register(HookRegistration::new(
            "ctx-b",
            HookKind::PreToolUse,
            20,
            Arc::new(Contextual("beta")),
        ));
        registry.register(HookRegistration::new(
            "ctx-a",
            HookKind::PreToolUse,
            10,
            Arc::new(Contextual("alpha")),
        ));

        let decision = executor.pre_tool_use(&payload("quill_file", json!({}))).await;
        assert_eq!(decision.additional_context.as_deref(), Some("alpha\nbeta"));
    }

    struct Failing;

    #[async_trait]
    impl HookHandler for Failing {
        async fn pre_tool_use(
            &self,
            _payload: &PreToolUsePayload,
        ) -> Result<PreToolUseOutcome, HookError> {
            Err(HookError::ExecutionFailed {
                id: "failing".to_string(),
                reason: "simulated".to_string(),
            })
        }

        async fn post_tool_use(
            &self,
            _payload: &PostToolUsePayload,
        ) -> Result<PostToolUseOutcome, HookError> {
            Err(HookError::ExecutionFailed {
                id: "failing".to_string(),
                reason: "simulated".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failing_hook_is_a_noop() {
        let (executor, registry) = executor();
        registry.register(HookRegistration::new(
            "failing",
            HookKind::PreToolUse,
            10,
            Arc::new(Failing),
        ));
        let after = register_scripted(
            &registry,
            "after",
            20,
            PreToolUseOutcome::ask(InteractDetails::Custom {
                description: "still asked".to_string(),
            }),
        );

        let decision = executor.pre_tool_use(&payload("quill_file", json!({}))).await;
        assert_eq!(decision.decision, HookDecision::Ask);
        assert_eq!(after.load(Ordering::SeqCst), 1, "chain continues past a failure");
    }

    struct ResultRewriter {
        suffix: &'static str,
    }

    #[async_trait]
    impl HookHandler for ResultRewriter {
        async fn post_tool_use(
            &self,
            payload: &PostToolUsePayload,
        ) -> Result<PostToolUseOutcome, HookError> {
            Ok(PostToolUseOutcome {
                replace_result: Some(format!("{}{}", payload.result, self.suffix)),
                additional_context: None,
            })
        }
    }

    #[tokio::test]
    async fn post_tool_use_rewrites_sequentially() {
        let (executor, registry) = executor();
        registry.register(HookRegistration::new(
            "suffix-1",
            HookKind::PostToolUse,
            10,
            Arc::new(ResultRewriter { suffix: "+one" }),
        ));
        registry.register(HookRegistration::new(
            "suffix-2",
            HookKind::PostToolUse,
            20,
            Arc::new(ResultRewriter { suffix: "+two" }),
        ));
        registry.register(HookRegistration::new(
            "failing",
            HookKind::PostToolUse,
            15,
            Arc::new(Failing),
        ));

        let decision = executor
            .post_tool_use(&PostToolUsePayload {
                session_id: "s1".to_string(),
                scope: "main".to_string(),
                tool_name: "quill_file".to_string(),
                arguments: json!({}),
                result: "base".to_string(),
                error: false,
            })
            .await;
        assert_eq!(decision.result, "base+one+two");
    }

    struct QueryOverride(&'static str);

    #[async_trait]
    impl HookHandler for QueryOverride {
        async fn pre_memory_inject(
            &self,
            _payload: &PreMemoryInjectPayload,
        ) -> Result<PreMemoryInjectOutcome, HookError> {
            Ok(PreMemoryInjectOutcome {
                replace_bundle: None,
                override_query: Some(self.0.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn memory_inject_last_query_override_wins() {
        let (executor, registry) = executor();
        registry.register(HookRegistration::new(
            "q1",
            HookKind::PreMemoryInject,
            10,
            Arc::new(QueryOverride("first")),
        ));
        registry.register(HookRegistration::new(
            "q2",
            HookKind::PreMemoryInject,
            20,
            Arc::new(QueryOverride("last")),
        ));

        let decision = executor
            .pre_memory_inject(&PreMemoryInjectPayload {
                session_id: "s1".to_string(),
                scope: "main".to_string(),
                bundle: MemoryBundle::default(),
                query: Some("original".to_string()),
            })
            .await;
        assert_eq!(decision.query.as_deref(), Some("last"));
    }

    struct Excluder(&'static [&'static str]);

    #[async_trait]
    impl HookHandler for Excluder {
        async fn post_memory_extract(
            &self,
            _payload: &PostMemoryExtractPayload,
        ) -> Result<PostMemoryExtractOutcome, HookError> {
            Ok(PostMemoryExtractOutcome {
                exclude_ids: self.0.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    #[tokio::test]
    async fn memory_extract_excludes_are_deduped_union() {
        let (executor, registry) = executor();
        registry.register(HookRegistration::new(
            "e1",
            HookKind::PostMemoryExtract,
            10,
            Arc::new(Excluder(&["m1", "m2"])),
        ));
        registry.register(HookRegistration::new(
            "e2",
            HookKind::PostMemoryExtract,
            20,
            Arc::new(Excluder(&["m2", "m3"])),
        ));

        let decision = executor
            .post_memory_extract(&PostMemoryExtractPayload {
                session_id: "s1".to_string(),
                scope: "main".to_string(),
                extracted: vec![MemoryItem {
                    id: "m1".to_string(),
                    content: "x".to_string(),
                }],
            })
            .await;
        assert_eq!(decision.exclude_ids, vec!["m1", "m2", "m3"]);
    }
}
