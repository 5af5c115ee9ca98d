//! Tool-name matching and argument extraction.
//!
//! Compound tools carry an `action`/`mode` field whose meaning varies per
//! tool; the mapping from (tool, action) to an interaction detail kind is a
//! single data-driven table so the policy engine never scatters shape checks.

use serde_json::Value;

use crate::interact::InteractDetails;

/// Matches tool names against a rule pattern.
#[derive(Debug, Clone)]
pub enum ToolMatcher {
    Exact(String),
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

impl ToolMatcher {
    /// Parse a pattern: anything containing `*`, `?`, or `[` is a glob,
    /// everything else matches exactly.
    pub fn parse(pattern: &str) -> Self {
        if pattern.contains(['*', '?', '[']) {
            match glob::Pattern::new(pattern) {
                Ok(glob) => ToolMatcher::Glob(glob),
                Err(e) => {
                    tracing::warn!(pattern, "Invalid glob pattern, falling back to exact: {}", e);
                    ToolMatcher::Exact(pattern.to_string())
                }
            }
        } else {
            ToolMatcher::Exact(pattern.to_string())
        }
    }

    /// Build a regex matcher, validating eagerly.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ToolMatcher::Regex(regex::Regex::new(pattern)?))
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolMatcher::Exact(name) => name == tool_name,
            ToolMatcher::Glob(pattern) => pattern.matches(tool_name),
            ToolMatcher::Regex(regex) => regex.is_match(tool_name),
        }
    }
}

/// First of the `action`, `mode` string fields in a tool's argument object.
pub fn extract_tool_action(args: &Value) -> Option<String> {
    for key in ["action", "mode"] {
        if let Some(action) = args.get(key).and_then(|v| v.as_str()) {
            return Some(action.to_string());
        }
    }
    None
}

/// Which interaction detail constructor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailKind {
    FileAccess,
    Terminal,
    Destructive,
}

/// (tool name, actions it applies to — empty means any, detail kind).
/// First matching row wins; tools absent from the table get `Custom`.
const INTERACT_TABLE: &[(&str, &[&str], DetailKind)] = &[
    ("quill_file", &["write", "append"], DetailKind::FileAccess),
    ("quill_file", &["delete"], DetailKind::Destructive),
    ("quill_document", &["write", "save"], DetailKind::FileAccess),
    ("quill_document", &["delete"], DetailKind::Destructive),
    ("quill_terminal", &[], DetailKind::Terminal),
];

/// Collect every path-like argument: `path`, `paths[]`, `src`, `dest`.
fn collect_paths(args: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    for key in ["path", "src", "dest"] {
        if let Some(path) = args.get(key).and_then(|v| v.as_str()) {
            paths.push(path.to_string());
        }
    }
    if let Some(list) = args.get("paths").and_then(|v| v.as_array()) {
        for entry in list {
            if let Some(path) = entry.as_str() {
                paths.push(path.to_string());
            }
        }
    }
    paths
}

/// Build the interaction detail payload for a tool call needing approval.
///
/// Unknown tools, and known tools with missing fields, degrade to `Custom`.
pub fn extract_interact_details(tool_name: &str, args: &Value) -> InteractDetails {
    let action = extract_tool_action(args);
    let kind = INTERACT_TABLE.iter().find_map(|(name, actions, kind)| {
        if *name != tool_name {
            return None;
        }
        let action_matches = actions.is_empty()
            || action
                .as_deref()
                .is_some_and(|a| actions.contains(&a));
        action_matches.then_some(*kind)
    });

    match kind {
        Some(DetailKind::FileAccess) => {
            let paths = collect_paths(args);
            if paths.is_empty() {
                InteractDetails::Custom {
                    description: generic_description(tool_name, action.as_deref()),
                }
            } else {
                InteractDetails::FileAccess { paths }
            }
        }
        Some(DetailKind::Terminal) => match args.get("command").and_then(|v| v.as_str()) {
            Some(command) => InteractDetails::TerminalCommand {
                command: command.to_string(),
            },
            None => InteractDetails::Custom {
                description: generic_description(tool_name, action.as_deref()),
            },
        },
        Some(DetailKind::Destructive) => {
            let target = collect_paths(args).join(", ");
            let description = if target.is_empty() {
                format!("{tool_name} wants to delete a resource")
            } else {
                format!("{tool_name} wants to delete: {target}")
            };
            InteractDetails::DestructiveOperation { description }
        }
        None => InteractDetails::Custom {
            description: generic_description(tool_name, action.as_deref()),
        },
    }
}

fn generic_description(tool_name: &str, action: Option<&str>) -> String {
    match action {
        Some(action) => format!("{tool_name} wants to perform '{action}'"),
        None => format!("{tool_name} wants to run"),
    }
}
