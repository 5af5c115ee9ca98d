//! Tool-set assembly for one chat round.
//!
//! The pipeline is deterministic on purpose: the same session state and
//! configuration always produce the same tool list in the same order, so
//! the provider-side prompt cache keeps hitting.

use std::collections::HashSet;

use serde_json::json;

use crate::llm::ToolDefinition;
use crate::mcp::McpToolDef;
use crate::session::{AgentSession, OutputKind, OutputSpec, SessionKind};
pub use crate::tools::builtin::{NAVIGATE_TOOL, SUBMIT_RESULT_TOOL};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::ToolGroup;

/// Inputs to one tool-set assembly.
pub struct CatalogOptions<'a> {
    pub session: &'a AgentSession,
    /// Groups disabled for every session.
    pub disabled_groups: &'a HashSet<ToolGroup>,
    /// Groups disabled for this session only.
    pub session_disabled_groups: Option<&'a HashSet<ToolGroup>>,
    /// External tools, appended after builtins.
    pub mcp_tools: Vec<McpToolDef>,
    /// Search-provider definitions, empty when web search is off.
    pub web_search_tools: Vec<ToolDefinition>,
    /// Caller-supplied allow-list; `None` means everything assembled so far.
    pub allowed_tools: Option<&'a [String]>,
}

/// Assemble the tool definitions offered to the model for one round.
pub fn assemble_tool_set(registry: &ToolRegistry, opts: CatalogOptions<'_>) -> Vec<ToolDefinition> {
    let mut defs: Vec<ToolDefinition> = Vec::new();

    for tool in registry.all() {
        let group = tool.group();
        if opts.disabled_groups.contains(&group) {
            continue;
        }
        if opts
            .session_disabled_groups
            .is_some_and(|g| g.contains(&group))
        {
            continue;
        }
        // Result submission only exists for background sessions, re-typed
        // to the task's declared output shape.
        if tool.name() == SUBMIT_RESULT_TOOL {
            if opts.session.kind != SessionKind::Background {
                continue;
            }
            let spec = opts
                .session
                .background_task
                .as_ref()
                .and_then(|t| t.output_spec.as_ref());
            if let Some(spec) = spec {
                defs.push(result_tool_for(spec));
                continue;
            }
        }
        // Workflow-management sessions navigate through the engine, not
        // the generic navigation tool.
        if opts.session.workflow_session && tool.name() == NAVIGATE_TOOL {
            continue;
        }
        defs.push(tool.definition());
    }

    // Sorted by full name for prompt-cache stability.
    let mut mcp = opts.mcp_tools;
    mcp.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    for tool in mcp {
        defs.push(ToolDefinition {
            name: tool.full_name,
            description: tool.description,
            parameters: tool.parameters,
        });
    }

    defs.extend(opts.web_search_tools);

    if let Some(allowed) = opts.allowed_tools {
        defs.retain(|d| allowed.iter().any(|a| a == &d.name));
    }

    defs
}

/// Build the result-submission tool definition from a task's output spec.
///
/// Pure: same spec, same definition. The schema mirrors the declared
/// fields so the model submits exactly the shape the task asked for.
pub fn result_tool_for(spec: &OutputSpec) -> ToolDefinition {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for field in &spec.fields {
        let type_schema = match field.kind {
            OutputKind::Text => json!({"type": "string", "description": field.description}),
            OutputKind::Number => json!({"type": "number", "description": field.description}),
            OutputKind::Boolean => json!({"type": "boolean", "description": field.description}),
            OutputKind::Json => json!({"description": field.description}),
        };
        properties.insert(field.name.clone(), type_schema);
        if field.required {
            required.push(json!(field.name));
        }
    }
    ToolDefinition {
        name: SUBMIT_RESULT_TOOL.to_string(),
        description: "Submit the final result for this background task. \
                      Calling this successfully completes the task and ends the session."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}
