//! 工具调用格式说明（schemars 自动生成工具调用 Schema）
//!
//! 将「合法 tool call」的 JSON 结构与当前注册的工具一起拼入 system prompt，减少模型输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

use crate::tools::ToolRegistry;

/// 工具调用请求格式：与命令解析器识别的 `{"action": "...", "parameters": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCommandFormat {
    /// 工具名，如 read_note、list_notes、write_note、thought、ask_user
    pub action: String,
    /// 工具参数，依工具不同而不同
    pub parameters: HashMap<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCommandFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 生成 system prompt 中的工具使用说明段落
pub fn tools_prompt_section(registry: &ToolRegistry) -> String {
    if registry.is_empty() {
        return String::new();
    }
    format!(
        "## Tools\n\n\
        To use a tool, write a fenced ```json block containing one object with an \"action\" \
        field and a \"parameters\" object. You may call several tools in one reply; they run in \
        the order written. Tool results are sent back to you in the next message. When you have \
        everything you need, reply with plain prose and no tool blocks.\n\n\
        Call format schema:\n{}\n\nAvailable tools:\n{}",
        tool_call_schema_json(),
        registry.to_schema_json()
    )
}
