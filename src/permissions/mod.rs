//! Rule-based access-control decisions, per-session permission state, and
//! the PreToolUse hook that plugs the engine into the chain.

pub mod rules;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

pub use rules::{PermissionMode, PermissionRule, RuleBehavior, default_rules};

use crate::events::{DomainEvent, EventBus};
use crate::hooks::{
    HookError, HookHandler, HookKind, HookRegistration, PreToolUseOutcome, PreToolUsePayload,
    extract_interact_details, extract_tool_action,
};
use crate::interact::InteractDetails;

/// Result of a permission check.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// Present when the call requires human approval.
    pub interact_details: Option<InteractDetails>,
    /// Present when the call was denied outright.
    pub deny_message: Option<String>,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            interact_details: None,
            deny_message: None,
        }
    }

    fn deny(message: String) -> Self {
        Self {
            allowed: false,
            interact_details: None,
            deny_message: Some(message),
        }
    }

    fn ask(details: InteractDetails) -> Self {
        Self {
            allowed: false,
            interact_details: Some(details),
            deny_message: None,
        }
    }

    /// Whether this decision suspends on human approval.
    pub fn needs_interaction(&self) -> bool {
        !self.allowed && self.interact_details.is_some()
    }
}

/// Per-session permission state: mode plus custom rules, both in process
/// memory, cleared when the session is deleted.
#[derive(Debug, Default)]
pub struct PermissionManager {
    modes: RwLock<HashMap<String, PermissionMode>>,
    custom_rules: RwLock<HashMap<String, Vec<PermissionRule>>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, session_id: &str, mode: PermissionMode) {
        self.modes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), mode);
    }

    pub fn mode(&self, session_id: &str) -> PermissionMode {
        self.modes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .copied()
            .unwrap_or_default()
    }

    /// Append custom rules for a session. Custom rules are taken at face
    /// value: `dontAsk` coercion applies only to the built-in tables.
    pub fn add_session_rules(&self, session_id: &str, rules: Vec<PermissionRule>) {
        self.custom_rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .extend(rules);
    }

    /// Drop all state for a session. Called by the session-deleted
    /// subscriber so the maps never grow unboundedly.
    pub fn clear_session(&self, session_id: &str) {
        self.modes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        self.custom_rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    /// Decide whether a tool call may proceed.
    ///
    /// Rules are the mode's defaults plus the session's custom rules, sorted
    /// ascending by priority; the first match applies. Tools no rule governs
    /// are allowed (fail-open for unlisted tools).
    pub fn check_permission(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &Value,
        granted_paths: &[String],
    ) -> PermissionDecision {
        let mode = self.mode(session_id);
        if mode == PermissionMode::BypassPermissions {
            return PermissionDecision::allow();
        }

        let mut rules = default_rules(mode);
        if let Some(custom) = self
            .custom_rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
        {
            rules.extend(custom.iter().cloned());
        }
        rules.sort_by_key(|r| r.priority);

        let action = extract_tool_action(args);
        for rule in &rules {
            if !tool_pattern_matches(&rule.tool_pattern, tool_name) {
                continue;
            }
            if let Some(required_action) = &rule.action {
                if action.as_deref() != Some(required_action.as_str()) {
                    continue;
                }
            }

            return match rule.behavior {
                RuleBehavior::Allow => PermissionDecision::allow(),
                RuleBehavior::Deny => {
                    let message = rule
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{tool_name} is not permitted"));
                    tracing::debug!(tool = %tool_name, rule = %rule.id, "Permission denied");
                    PermissionDecision::deny(message)
                }
                RuleBehavior::Ask => {
                    let details = extract_interact_details(tool_name, args);
                    match &details {
                        InteractDetails::FileAccess { paths } => {
                            let uncovered: Vec<String> = paths
                                .iter()
                                .filter(|p| !granted_paths.contains(p))
                                .cloned()
                                .collect();
                            if uncovered.is_empty() {
                                // Every path already authorized this session:
                                // implicitly allowed, no re-ask.
                                PermissionDecision::allow()
                            } else {
                                PermissionDecision::ask(InteractDetails::FileAccess {
                                    paths: uncovered,
                                })
                            }
                        }
                        _ => PermissionDecision::ask(details),
                    }
                }
            };
        }

        PermissionDecision::allow()
    }
}

fn tool_pattern_matches(pattern: &str, tool_name: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(glob) => glob.matches(tool_name),
        Err(e) => {
            tracing::warn!(pattern, "Invalid tool pattern in permission rule: {}", e);
            pattern == tool_name
        }
    }
}

/// Hook adapter mapping [`PermissionManager::check_permission`] onto the
/// PreToolUse outcome shape.
struct PermissionHook {
    manager: Arc<PermissionManager>,
}

#[async_trait]
impl HookHandler for PermissionHook {
    async fn pre_tool_use(
        &self,
        payload: &PreToolUsePayload,
    ) -> Result<PreToolUseOutcome, HookError> {
        let decision = self.manager.check_permission(
            &payload.session_id,
            &payload.tool_name,
            &payload.arguments,
            &payload.granted_paths,
        );
        if decision.allowed {
            Ok(PreToolUseOutcome::allow())
        } else if let Some(details) = decision.interact_details {
            Ok(PreToolUseOutcome::ask(details))
        } else {
            Ok(PreToolUseOutcome::deny(
                decision
                    .deny_message
                    .unwrap_or_else(|| "Not permitted".to_string()),
            ))
        }
    }
}

/// Registration id of the built-in permission hook.
pub const PERMISSION_HOOK_ID: &str = "builtin:permissions";

/// Build the PreToolUse registration for the permission engine.
///
/// Priority 10 is intentionally low so permissions run before audit and
/// other policy hooks.
pub fn permission_hook(manager: Arc<PermissionManager>) -> HookRegistration {
    HookRegistration::new(
        PERMISSION_HOOK_ID,
        HookKind::PreToolUse,
        10,
        Arc::new(PermissionHook { manager }),
    )
}

/// Subscribe to session-deleted events and drop the session's permission
/// state. Returns the task handle so callers can abort on shutdown.
pub fn spawn_cleanup_subscriber(
    manager: Arc<PermissionManager>,
    events: &EventBus,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(DomainEvent::SessionDeleted { session_id, .. }) => {
                    manager.clear_session(&session_id);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Permission cleanup subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
