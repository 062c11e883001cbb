//! 工具调用的数据类型：ToolCommand / ToolResult / ToolExecutionResult / ToolContext

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// 模型输出中提取出的一次工具调用请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ToolCommand {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters_value(&self) -> Value {
        Value::Object(self.parameters.clone())
    }
}

/// 工具执行结果；每次调用都以且仅以这种形态结束，工具不会把异常抛过边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// 日志/事件用的简短预览
    pub fn preview(&self, max_chars: usize) -> String {
        let full = match (&self.data, &self.error) {
            (_, Some(e)) => format!("Error: {}", e),
            (Some(Value::String(s)), None) => s.clone(),
            (Some(v), None) => v.to_string(),
            (None, None) => "ok".to_string(),
        };
        if full.chars().count() > max_chars {
            format!("{}...", full.chars().take(max_chars).collect::<String>())
        } else {
            full
        }
    }
}

/// 一轮中单次工具调用的持久化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub command: ToolCommand,
    pub result: ToolResult,
}

/// 传给工具 execute 的调用上下文
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// 当前是第几轮模型调用（从 1 开始）
    pub iteration: usize,
    /// 本次调用之前已执行的工具次数
    pub tool_execution_count: usize,
    /// 本轮的取消信号；循环不会抢占工具，长任务可自行观察
    pub cancel_token: CancellationToken,
}
