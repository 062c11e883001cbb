//! 任务状态机：TaskState 与 TaskStatus
//!
//! `Idle -> Running -> {Completed | Stopped | LimitReached | WaitingForUser}`。
//! Idle 是唯一初始状态；右侧四个状态对单次循环而言是终态，新轮次总是从 Idle 重新开始。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 单次循环的任务状态（序列化为 snake_case，如 `limit_reached`）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Stopped,
    Completed,
    LimitReached,
    WaitingForUser,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Stopped
                | TaskState::Completed
                | TaskState::LimitReached
                | TaskState::WaitingForUser
        )
    }

    /// 状态机允许的迁移：Idle 只能进入 Running，Running 只能进入某个终态
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            TaskState::Idle => next == TaskState::Running,
            TaskState::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::Stopped => "stopped",
            TaskState::Completed => "completed",
            TaskState::LimitReached => "limit_reached",
            TaskState::WaitingForUser => "waiting_for_user",
        }
    }
}

/// 任务状态快照：状态 + 工具调用计数 + 预算上限
///
/// 不变量：任何观测点上 `tool_execution_count <= max_tool_executions`。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub status: TaskState,
    pub tool_execution_count: usize,
    pub max_tool_executions: usize,
}

impl TaskStatus {
    pub fn new(max_tool_executions: usize) -> Self {
        Self {
            status: TaskState::Idle,
            tool_execution_count: 0,
            max_tool_executions,
        }
    }

    pub fn transition(&mut self, next: TaskState) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// 预算是否已用完（再执行一次就会超过上限）
    pub fn budget_exhausted(&self) -> bool {
        self.tool_execution_count >= self.max_tool_executions
    }

    /// 记录一次工具执行；预算已满时拒绝且不改变计数
    pub fn record_tool_execution(&mut self) -> bool {
        if self.budget_exhausted() {
            return false;
        }
        self.tool_execution_count += 1;
        true
    }

    pub fn remaining(&self) -> usize {
        self.max_tool_executions
            .saturating_sub(self.tool_execution_count)
    }
}
