pub mod base;
pub mod bugtracker;
pub mod discovery;
pub mod dispatcher;
pub mod websearch;

pub use base::{ContentBlock, Plugin, ToolDefinition, ToolResult};
pub use dispatcher::{DispatchError, ToolDispatcher};
