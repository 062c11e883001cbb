//! Agent 错误类型
//!
//! 工具错误不会出现在这里：它们在 ToolRegistry 边界被折叠为 `ToolResult { success: false }`，
//! 取消也不是错误，而是映射为任务状态 `Stopped`。

use thiserror::Error;

use crate::core::TaskState;
use crate::llm::LlmError;
use crate::memory::HistoryError;

/// 一次对话轮次中会向调用方抛出的错误（模型/传输、持久化、并发策略、重新生成定位等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// 同一会话已有一个循环在运行，新的轮次被拒绝（不排队、不交错）
    #[error("A turn is already running for this conversation")]
    Busy,

    #[error("Invalid task transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Cannot regenerate: {0}")]
    RegenerationTarget(String),

    #[error("Nothing to resume: last turn did not stop on a limit or a question")]
    NothingToResume,

    #[error("Message index out of range: {0}")]
    MessageIndex(usize),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    /// 模型层的取消错误（正常情况下已被循环映射为 Stopped，不会冒泡到这里）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::LlmError(e) if e.is_cancellation())
    }
}
