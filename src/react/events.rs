//! Agent 过程事件：用于流式展示状态变化、模型输出片段、工具调用与结果

use serde::Serialize;

use crate::core::TaskStatus;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 任务状态变化（Running / Completed / LimitReached ...）
    StatusChanged { status: TaskStatus },
    /// 即将发起第几轮模型调用
    Thinking { iteration: usize, max_iterations: usize },
    /// 模型正文片段（流式）
    ContentChunk { text: String },
    /// 模型推理片段（流式）
    ReasoningChunk { text: String },
    /// 调用工具
    ToolCall {
        action: String,
        parameters: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        action: String,
        success: bool,
        preview: String,
    },
    /// 本轮结束
    Done { status: TaskStatus },
    /// 模型/传输错误
    Error { text: String },
}
