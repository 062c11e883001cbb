//! LLM 客户端抽象
//!
//! 具体的 HTTP/流式 Provider 不在本 crate 内；编排器只依赖 LlmClient：
//! complete（非流式）与 complete_stream（流式 Chunk，默认由 complete 退化而来）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::memory::Message;

/// 模型调用错误；Cancelled 是特殊的一类，编排器将其映射为 Stopped 而非失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("Model call timed out after {0} ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LlmError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// 调用选项：温度、最大 token、取消信号
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// 本轮的取消信号；Provider 可据此中断网络请求
    pub cancel_token: CancellationToken,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            cancel_token: CancellationToken::new(),
        }
    }
}

/// 一次完整的模型输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub reasoning: Option<String>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// 流式输出片段：正文或推理内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Content(String),
    Reasoning(String),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;

    /// 流式完成；默认把 complete 的结果作为单个（或两个，含推理）片段返回
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionStream, LlmError> {
        let completion = self.complete(messages, options).await?;
        let mut chunks = Vec::with_capacity(2);
        if let Some(reasoning) = completion.reasoning {
            chunks.push(Ok(StreamChunk::Reasoning(reasoning)));
        }
        chunks.push(Ok(StreamChunk::Content(completion.content)));
        Ok(Box::pin(stream::iter(chunks)))
    }
}
