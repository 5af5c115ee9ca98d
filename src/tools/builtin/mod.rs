//! Built-in tools that come with the orchestrator.

mod document;
mod file;
mod locks;
mod navigate;
mod submit_result;
mod terminal;
mod todo;
mod workflow;

pub use document::{DOCUMENT_TOOL, DocumentTool};
pub use file::{FILE_TOOL, FileTool};
pub use locks::{LOCKS_TOOL, LocksTool};
pub use navigate::{NAVIGATE_TOOL, NavigateTool};
pub use submit_result::{SUBMIT_RESULT_TOOL, SubmitResultTool};
pub use terminal::{TERMINAL_TOOL, TerminalTool};
pub use todo::{TODO_TOOL, TodoTool};
pub use workflow::{WORKFLOW_TOOL, WorkflowTool};

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::locks::LockManager;
use crate::tools::registry::ToolRegistry;
use crate::workflow::WorkflowEngine;
use crate::workspace::WorkspaceStore;

/// Register the full builtin tool set with the configured file root and
/// terminal timeout.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    config: &OrchestratorConfig,
    workspace: Arc<WorkspaceStore>,
    locks: Arc<LockManager>,
    engine: Arc<dyn WorkflowEngine>,
) {
    registry.register(Arc::new(FileTool::new(config.file_root.clone())));
    registry.register(Arc::new(TodoTool::new(workspace.clone(), locks.clone())));
    registry.register(Arc::new(DocumentTool::new(workspace.clone(), locks.clone())));
    registry.register(Arc::new(TerminalTool::new(config.terminal_timeout)));
    registry.register(Arc::new(LocksTool::new(locks)));
    registry.register(Arc::new(WorkflowTool::new(engine)));
    registry.register(Arc::new(NavigateTool::new(workspace)));
    registry.register(Arc::new(SubmitResultTool));
}
