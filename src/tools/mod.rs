pub mod notes;
pub mod registry;
pub mod schema;
pub mod thought;
pub mod types;

pub use notes::{ListNotesTool, NoteVault, ReadNoteTool, WriteNoteTool};
pub use registry::{Tool, ToolRegistry, Typed, TypedTool};
pub use schema::{tool_call_schema_json, tools_prompt_section};
pub use thought::{AskUserTool, ThoughtTool};
pub use types::{ToolCommand, ToolContext, ToolExecutionResult, ToolResult};

/// 注册内置的全部笔记工具
pub fn builtin_registry(vault: NoteVault) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register_typed(ReadNoteTool::new(vault.clone()));
    tools.register_typed(ListNotesTool::new(vault.clone()));
    tools.register_typed(WriteNoteTool::new(vault));
    tools.register_typed(ThoughtTool);
    tools.register_typed(AskUserTool);
    tools
}
