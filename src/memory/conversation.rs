//! 模型调用上下文中的消息
//!
//! Message 是瞬态的：只用于拼装一次模型调用的上下文，不直接持久化（持久化实体见 ChatMessage）。

use serde::{Deserialize, Serialize};

use crate::core::TaskStatus;
use crate::tools::ToolExecutionResult;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolExecutionResult>>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            reasoning: None,
            task_status: None,
            tool_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// 把一次工具调用的结果包装成回灌给模型的合成消息
    pub fn tool_result(execution: &ToolExecutionResult) -> Self {
        let payload = serde_json::to_string(&execution.result)
            .unwrap_or_else(|_| "{\"success\":false}".to_string());
        let mut msg = Self::user(format!(
            "Tool result for `{}`: {}",
            execution.command.action, payload
        ));
        msg.tool_results = Some(vec![execution.clone()]);
        msg
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::User && self.tool_results.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolCommand, ToolResult};

    #[test]
    fn test_tool_result_message_carries_result() {
        let execution = ToolExecutionResult {
            command: ToolCommand::new("read_note"),
            result: ToolResult::err("Path not found: a.md"),
        };
        let msg = Message::tool_result(&execution);
        assert!(msg.is_tool_result());
        assert_eq!(msg.role, Role::User);
        assert!(msg.content.starts_with("Tool result for `read_note`"));
        assert!(msg.content.contains("Path not found"));
        assert!(!Message::user("plain").is_tool_result());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
