//! Background-task result submission tool.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ToolError;
use crate::session::{OutputKind, OutputSpec};
use crate::tools::tool::{Tool, ToolContext, ToolGroup};

pub const SUBMIT_RESULT_TOOL: &str = "quill_submit_result";

/// Accepts the final result of a background task. The catalog re-types this
/// tool's schema from the task's output spec; execution re-validates the
/// submission against the same spec. A successful call ends the chat loop.
pub struct SubmitResultTool;

fn validate(spec: &OutputSpec, params: &serde_json::Value) -> Result<(), String> {
    let mut problems = Vec::new();
    for field in &spec.fields {
        let value = params.get(&field.name);
        match value {
            None if field.required => problems.push(format!("missing required field '{}'", field.name)),
            None => {}
            Some(value) => {
                let ok = match field.kind {
                    OutputKind::Text => value.is_string(),
                    OutputKind::Number => value.is_number(),
                    OutputKind::Boolean => value.is_boolean(),
                    OutputKind::Json => true,
                };
                if !ok {
                    problems.push(format!(
                        "field '{}' has the wrong type, expected {:?}",
                        field.name, field.kind
                    ));
                }
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}

#[async_trait]
impl Tool for SubmitResultTool {
    fn name(&self) -> &str {
        SUBMIT_RESULT_TOOL
    }

    fn description(&self) -> &str {
        "Submit the final result for this background task. \
         Calling this successfully completes the task and ends the session."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        // Placeholder; the catalog substitutes the task-specific schema.
        json!({
            "type": "object",
            "properties": {},
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Results
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let task = ctx
            .background_task
            .as_ref()
            .ok_or_else(|| ToolError::ExecutionFailed {
                name: SUBMIT_RESULT_TOOL.to_string(),
                reason: "only available for background task sessions".to_string(),
            })?;
        if let Some(spec) = &task.output_spec {
            validate(spec, &params).map_err(|reason| ToolError::InvalidParameters {
                name: SUBMIT_RESULT_TOOL.to_string(),
                reason,
            })?;
        }
        Ok(json!({"success": true, "result": params}).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BackgroundTask, OutputField};

    fn text_field(name: &str, required: bool) -> OutputField {
        OutputField {
            name: name.to_string(),
            kind: OutputKind::Text,
            description: String::new(),
            required,
        }
    }

    fn ctx_with_spec(fields: Vec<OutputField>) -> ToolContext {
        ToolContext::new("s1", "main").with_background_task(BackgroundTask {
            description: "task".to_string(),
            output_spec: Some(OutputSpec { fields }),
        })
    }

    #[tokio::test]
    async fn valid_submission_succeeds() {
        let ctx = ctx_with_spec(vec![text_field("summary", true)]);
        let result = SubmitResultTool
            .execute(json!({"summary": "done"}), &ctx)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["result"]["summary"], "done");
    }

    #[tokio::test]
    async fn missing_required_field_rejected() {
        let ctx = ctx_with_spec(vec![text_field("summary", true)]);
        let err = SubmitResultTool.execute(json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("summary"), "got: {err}");
    }

    #[tokio::test]
    async fn wrong_type_rejected() {
        let ctx = ctx_with_spec(vec![OutputField {
            name: "count".to_string(),
            kind: OutputKind::Number,
            description: String::new(),
            required: true,
        }]);
        let err = SubmitResultTool
            .execute(json!({"count": "three"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[tokio::test]
    async fn interactive_session_cannot_submit() {
        let ctx = ToolContext::new("s1", "main");
        assert!(SubmitResultTool.execute(json!({}), &ctx).await.is_err());
    }
}
