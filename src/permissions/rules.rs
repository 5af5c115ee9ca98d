//! Static default rule tables per permission mode.

use serde::{Deserialize, Serialize};

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBehavior {
    Allow,
    Deny,
    Ask,
}

/// One access-control rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub id: String,
    /// Glob over tool names.
    pub tool_pattern: String,
    /// For compound tools: the rule applies only when the tool's extracted
    /// `action`/`mode` argument equals this.
    pub action: Option<String>,
    pub behavior: RuleBehavior,
    pub message: Option<String>,
    /// Lower evaluates first; first match wins.
    pub priority: i32,
}

impl PermissionRule {
    pub fn new(
        id: impl Into<String>,
        tool_pattern: impl Into<String>,
        behavior: RuleBehavior,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            tool_pattern: tool_pattern.into(),
            action: None,
            behavior,
            message: None,
            priority,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Session permission mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    AcceptEdits,
    BypassPermissions,
    DontAsk,
}

/// The tool/action pairs governed by the built-in tables.
///
/// `default` marks these `ask`; `plan` denies them; `dontAsk` denies them
/// without ever prompting. Action `None` covers every invocation of the tool.
const GOVERNED: &[(&str, Option<&str>)] = &[
    ("quill_file", Some("write")),
    ("quill_file", Some("append")),
    ("quill_file", Some("delete")),
    ("quill_document", Some("write")),
    ("quill_document", Some("delete")),
    ("quill_terminal", None),
];

/// Compiled-in rule table for a mode.
///
/// `acceptEdits` and `bypassPermissions` return empty sets: nothing is
/// restricted (editing auto-approved or fully bypassed).
pub fn default_rules(mode: PermissionMode) -> Vec<PermissionRule> {
    match mode {
        PermissionMode::AcceptEdits | PermissionMode::BypassPermissions => Vec::new(),
        PermissionMode::Default => governed_rules(RuleBehavior::Ask, |_, _| None),
        PermissionMode::Plan => governed_rules(RuleBehavior::Deny, |tool, action| {
            Some(match action {
                Some(action) => format!("Plan mode is read-only: {tool} {action} is not permitted"),
                None => format!("Plan mode is read-only: {tool} is not permitted"),
            })
        }),
        // Same governed set as `default`, but every ask becomes an immediate
        // deny: this mode never prompts a human, it fails closed.
        PermissionMode::DontAsk => governed_rules(RuleBehavior::Deny, |tool, action| {
            Some(match action {
                Some(action) => {
                    format!("{tool} {action} requires approval, and prompting is disabled")
                }
                None => format!("{tool} requires approval, and prompting is disabled"),
            })
        }),
    }
}

fn governed_rules(
    behavior: RuleBehavior,
    message: impl Fn(&str, Option<&str>) -> Option<String>,
) -> Vec<PermissionRule> {
    GOVERNED
        .iter()
        .enumerate()
        .map(|(i, (tool, action))| {
            let id = match action {
                Some(action) => format!("builtin:{tool}:{action}"),
                None => format!("builtin:{tool}"),
            };
            let mut rule =
                PermissionRule::new(id, *tool, behavior, 100 + i as i32);
            if let Some(action) = action {
                rule = rule.with_action(*action);
            }
            if let Some(msg) = message(tool, *action) {
                rule = rule.with_message(msg);
            }
            rule
        })
        .collect()
}
