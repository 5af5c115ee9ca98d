//! Tool trait, registry, catalog assembly, and the builtin tools.

pub mod builtin;
pub mod catalog;
pub mod registry;
pub mod tool;

pub use catalog::{CatalogOptions, assemble_tool_set, result_tool_for};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolGroup};
