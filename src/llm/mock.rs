//! Mock LLM 客户端（用于本地运行与测试，无需 API）
//!
//! - MockLlmClient：首轮先记录一条 thought，再在看到工具结果后回显用户最后一条消息
//! - ScriptedLlmClient：按顺序返回预设回复，可插入「等待取消」步骤，并记录每次收到的上下文

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Completion, CompletionOptions, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let last = messages.last();
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.is_tool_result())
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if last.map(|m| m.is_tool_result()).unwrap_or(false) {
            return Ok(Completion::text(format!("Echo from Mock: {}", last_user)));
        }

        let command = serde_json::json!({
            "action": "thought",
            "parameters": { "thought": format!("User asked: {}", last_user) }
        });
        Ok(Completion::text(format!(
            "Let me think about that.\n\n```json\n{}\n```",
            command
        )))
    }
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(Completion),
    Fail(LlmError),
    /// 挂起直到本轮取消令牌被触发，然后返回 Cancelled
    WaitForCancel,
}

/// 按脚本回复的客户端；脚本耗尽后返回 Transport 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 便捷构造：每一项都是纯文本回复
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            replies
                .into_iter()
                .map(|r| ScriptStep::Reply(Completion::text(r))),
        )
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// 每次调用收到的完整上下文（按调用顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(messages.to_vec());
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match step {
            Some(ScriptStep::Reply(completion)) => Ok(completion),
            Some(ScriptStep::Fail(e)) => Err(e),
            Some(ScriptStep::WaitForCancel) => {
                options.cancel_token.cancelled().await;
                Err(LlmError::Cancelled)
            }
            None => Err(LlmError::Transport("script exhausted".to_string())),
        }
    }
}
