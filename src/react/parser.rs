//! 命令解析：从模型回复中提取工具调用
//!
//! 工具调用写在围栏代码块里（```json / ```tool / 无语言标记），内容是带 `action` 字段的 JSON 对象。
//! 回复被切分为有序的 text / tool 片段；JSON 非法的块退化为普通文本，不中断解析。
//! 整段回复就是一个裸 JSON 命令时（无围栏）也识别为单个工具调用。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolCommand;

/// 可承载工具调用的代码块语言标记
const TOOL_FENCE_TAGS: &[&str] = &["", "json", "tool", "tool_call", "tool-call"];

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn fence_re() -> &'static Regex {
    FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("fence pattern is valid")
    })
}

/// 回复中的一个片段
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { content: String },
    Tool { command: ToolCommand },
}

impl Segment {
    pub fn is_tool(&self) -> bool {
        matches!(self, Segment::Tool { .. })
    }
}

/// 解析结果：按源文本顺序排列的片段
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedOutput {
    pub segments: Vec<Segment>,
}

impl ParsedOutput {
    /// 按出现顺序的工具调用
    pub fn commands(&self) -> Vec<ToolCommand> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Tool { command } => Some(command.clone()),
                Segment::Text { .. } => None,
            })
            .collect()
    }

    pub fn has_commands(&self) -> bool {
        self.segments.iter().any(Segment::is_tool)
    }

    /// 去掉工具片段后的正文，供界面展示
    pub fn cleaned_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { content } => Some(content.as_str()),
                Segment::Tool { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// 解析模型回复
pub fn parse_commands(raw: &str) -> ParsedOutput {
    let mut segments = Vec::new();
    let mut pending = String::new();
    let mut last = 0;

    for caps in fence_re().captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        pending.push_str(&raw[last..whole.start()]);
        let tag = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        match parse_tool_block(tag, body) {
            Some(command) => {
                flush_text(&mut segments, &mut pending);
                segments.push(Segment::Tool { command });
            }
            None => pending.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    pending.push_str(&raw[last..]);

    if segments.is_empty() {
        // 无围栏：整段是裸 JSON 命令
        if let Some(command) = parse_command_json(pending.trim()) {
            return ParsedOutput {
                segments: vec![Segment::Tool { command }],
            };
        }
    }
    flush_text(&mut segments, &mut pending);
    ParsedOutput { segments }
}

/// 空白文本不形成片段；相邻文本（含退化的坏块）合并为一个片段
fn flush_text(segments: &mut Vec<Segment>, pending: &mut String) {
    let text = pending.trim();
    if !text.is_empty() {
        segments.push(Segment::Text {
            content: text.to_string(),
        });
    }
    pending.clear();
}

fn parse_tool_block(tag: &str, body: &str) -> Option<ToolCommand> {
    let tag = tag.to_ascii_lowercase();
    if !TOOL_FENCE_TAGS.contains(&tag.as_str()) {
        return None;
    }
    let command = parse_command_json(body.trim());
    if command.is_none() {
        tracing::debug!(tag = %tag, "Fenced block is not a tool call, kept as text");
    }
    command
}

/// `{"action": "...", "parameters": {...}}`；缺少 parameters 时把其余字段视为参数
fn parse_command_json(text: &str) -> Option<ToolCommand> {
    if !text.starts_with('{') {
        return None;
    }
    let Value::Object(mut obj) = serde_json::from_str::<Value>(text).ok()? else {
        return None;
    };
    let action = match obj.remove("action") {
        Some(Value::String(a)) if !a.trim().is_empty() => a.trim().to_string(),
        _ => return None,
    };
    let parameters = match obj.remove("parameters") {
        Some(Value::Object(params)) => params,
        Some(Value::Null) | None => obj,
        Some(_) => return None,
    };
    Some(ToolCommand { action, parameters })
}
