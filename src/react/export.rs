//! 复制/导出格式：把一轮的结构化元数据以围栏块附在正文之后
//!
//! ~~~text
//! 正文……
//!
//! ```scribe-meta
//! {"toolResults": [...], "reasoning": "...", "taskStatus": {...}}
//! ```
//! ~~~
//!
//! 解析导出文本时先用 strip_metadata 去掉该块，剩余部分才是正文。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::TaskStatus;
use crate::memory::ChatMessage;
use crate::tools::ToolExecutionResult;

/// 元数据块的语言标记
pub const METADATA_FENCE: &str = "scribe-meta";

static METADATA_RE: OnceLock<Regex> = OnceLock::new();

fn metadata_re() -> &'static Regex {
    METADATA_RE.get_or_init(|| {
        Regex::new(r"(?s)\n*```scribe-meta[ \t]*\r?\n(.*?)\r?\n?```[ \t]*\n?")
            .expect("metadata pattern is valid")
    })
}

/// 随正文导出的结构化元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    #[serde(default)]
    pub tool_results: Vec<ToolExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
}

impl TurnMetadata {
    pub fn from_message(msg: &ChatMessage) -> Self {
        Self {
            tool_results: msg.tool_results.clone().unwrap_or_default(),
            reasoning: msg.reasoning.clone(),
            task_status: msg.task_status.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tool_results.is_empty() && self.reasoning.is_none() && self.task_status.is_none()
    }
}

/// 在正文后追加元数据块；元数据为空时原样返回
pub fn embed_metadata(content: &str, meta: &TurnMetadata) -> String {
    if meta.is_empty() {
        return content.to_string();
    }
    let json = serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n\n```{}\n{}\n```",
        content.trim_end(),
        METADATA_FENCE,
        json
    )
}

/// 去掉元数据块，返回 (正文, 元数据)；块内 JSON 非法时仍然去掉该块，元数据为 None
pub fn strip_metadata(text: &str) -> (String, Option<TurnMetadata>) {
    let re = metadata_re();
    let Some(caps) = re.captures(text) else {
        return (text.to_string(), None);
    };
    let meta = caps.get(1).and_then(|m| {
        serde_json::from_str::<TurnMetadata>(m.as_str().trim())
            .map_err(|e| tracing::warn!(error = %e, "Malformed export metadata block"))
            .ok()
    });
    let prose = re.replace_all(text, "\n").trim().to_string();
    (prose, meta)
}

/// 导出单条消息（用于复制到剪贴板或保存为笔记）
pub fn export_message(msg: &ChatMessage) -> String {
    embed_metadata(&msg.content, &TurnMetadata::from_message(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskState;
    use crate::tools::{ToolCommand, ToolResult};

    fn sample_meta() -> TurnMetadata {
        let mut status = TaskStatus::new(5);
        status.tool_execution_count = 1;
        status.status = TaskState::Completed;
        TurnMetadata {
            tool_results: vec![ToolExecutionResult {
                command: ToolCommand::new("read_note").with_param("path", "todo.md"),
                result: ToolResult::ok("- buy milk"),
            }],
            reasoning: Some("read first".to_string()),
            task_status: Some(status),
        }
    }

    #[test]
    fn test_embed_and_strip() {
        let exported = embed_metadata("You need milk.", &sample_meta());
        assert!(exported.starts_with("You need milk.\n\n```scribe-meta\n"));
        assert!(exported.contains("\"toolResults\""));
        assert!(exported.contains("\"taskStatus\""));

        let (prose, meta) = strip_metadata(&exported);
        assert_eq!(prose, "You need milk.");
        assert_eq!(meta, Some(sample_meta()));
    }

    #[test]
    fn test_empty_metadata_is_not_embedded() {
        assert_eq!(embed_metadata("plain", &TurnMetadata::default()), "plain");
        let (prose, meta) = strip_metadata("plain");
        assert_eq!(prose, "plain");
        assert!(meta.is_none());
    }

    #[test]
    fn test_strip_leaves_other_code_blocks() {
        let text = "Run this:\n```json\n{\"a\": 1}\n```\n\n```scribe-meta\n{not json}\n```";
        let (prose, meta) = strip_metadata(text);
        assert!(meta.is_none());
        assert_eq!(prose, "Run this:\n```json\n{\"a\": 1}\n```");
    }

    #[test]
    fn test_export_message_without_metadata() {
        let msg = ChatMessage::user("hello");
        assert_eq!(export_message(&msg), "hello");
    }
}
